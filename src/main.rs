fn main() -> anyhow::Result<()> {
    aquadirt_lib::run()
}
