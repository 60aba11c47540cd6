fn main() -> anyhow::Result<()> {
    guided_capture_lib::run()
}
