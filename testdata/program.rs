static mut COUNTER: u64 = 0;

pub fn set_admin(ctx: Context<SetAdmin>, admin: Pubkey) -> Result<()> {
    ctx.accounts.config.admin = admin;
    Ok(())
}

fn first(values: Vec<u64>) -> u64 {
    let v = values.first().copied();
    v.unwrap()
}

fn lucky() -> u64 {
    let mut rng = rand::thread_rng();
    rng.gen()
}
