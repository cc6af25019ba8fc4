use shadow_rs::ShadowBuilder;

fn main() {
    ShadowBuilder::builder()
        .build()
        .expect("shadow-rs build metadata");
}
