//! Checks that the global registry arms its exit-time disposal on first use.
//!
//! Kept in its own binary: the hook state is process-wide.
#![cfg(unix)]

use std::sync::Arc;

use color_eyre::eyre::{Result, ensure};
use mongo_ephemeral::registry::atexit_hook_registered;
use mongo_ephemeral::test_support::{
    FakeMongodInstall, ScriptedProbe, fast_settings, scripted_supervisor,
};
use mongo_ephemeral::{MongodSupervisor, ProcessRegistry};

#[test]
fn first_global_registration_installs_the_atexit_hook() -> Result<()> {
    let install = FakeMongodInstall::healthy()?;
    ensure!(!atexit_hook_registered(), "hook installed before any child");

    let mut private = scripted_supervisor(fast_settings(&install), &ProcessRegistry::new());
    private.start()?;
    ensure!(
        !atexit_hook_registered(),
        "an injected registry installed the global hook"
    );
    private.stop()?;

    let mut global = MongodSupervisor::new(fast_settings(&install))
        .with_probe(Arc::new(ScriptedProbe::always_healthy()));
    global.start()?;
    ensure!(
        atexit_hook_registered(),
        "global registration left the hook uninstalled"
    );
    global.stop()?;
    Ok(())
}
