fn main() -> anyhow::Result<()> {
    ledgerpad_lib::run()
}
