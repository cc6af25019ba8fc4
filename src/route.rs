//! Store path routing: extracts `{store}/{fileId}` under the configured
//! prefix.

/// Routing outcome for one request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch {
    /// The configured prefix is absent; the request is not ours.
    PassThrough,
    /// The prefix is present but the remainder is not `/{store}/{fileId}`.
    BadPattern,
    /// A well-formed upload path.
    Upload { store_name: String, file_id: String },
}

/// Matches `path` against `prefix` followed by exactly two segments.
///
/// This is the single validation gate for malformed upload URLs and runs
/// before any store lookup.
pub fn match_store_path(path: &str, prefix: &str) -> RouteMatch {
    let Some(rest) = path.strip_prefix(prefix) else {
        return RouteMatch::PassThrough;
    };
    let Some(rest) = rest.strip_prefix('/') else {
        if rest.is_empty() {
            // The bare prefix with no segments.
            return RouteMatch::BadPattern;
        }
        // Shares a byte prefix but not a path boundary, e.g. `/ufsx`.
        return RouteMatch::PassThrough;
    };

    let mut segments = rest.split('/');
    let (Some(store_name), Some(file_id), None) =
        (segments.next(), segments.next(), segments.next())
    else {
        return RouteMatch::BadPattern;
    };
    if !is_valid_segment(store_name) || !is_valid_segment(file_id) {
        return RouteMatch::BadPattern;
    }

    RouteMatch::Upload {
        store_name: store_name.to_string(),
        file_id: file_id.to_string(),
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(['/', '?'])
}

/// Normalizes a configured prefix to `/name` form with no trailing slash.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    match trimmed {
        "" => String::new(),
        p if p.starts_with('/') => p.to_string(),
        p => format!("/{p}"),
    }
}
