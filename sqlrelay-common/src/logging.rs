/// Initialises the `env_logger` backend used by every crate in the
/// workspace. Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    let _ = env_logger::Builder::from_default_env().try_init();
}
