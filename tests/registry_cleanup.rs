//! Verifies that registry disposal reaps children supervisors still own.
#![cfg(unix)]

use std::sync::Arc;

use color_eyre::eyre::{Result, ensure, eyre};
use mongo_ephemeral::test_support::{
    FakeMongodInstall, ScriptedProbe, capture_warn_logs, fast_settings, is_alive,
    scripted_supervisor,
};
use mongo_ephemeral::{
    MongodSupervisor, ProcessRegistry, RegistryError, SupervisorState, install_exit_hooks,
};

#[test]
fn dispose_terminates_every_registered_instance() -> Result<()> {
    let install = FakeMongodInstall::healthy()?;
    let registry = ProcessRegistry::new();
    let mut first = scripted_supervisor(fast_settings(&install), &registry);
    let mut second = scripted_supervisor(fast_settings(&install), &registry);
    first.start()?;
    second.start()?;
    let handles = [first.handle(), second.handle()]
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| eyre!("started supervisors expose handles"))?;

    let (logs, terminated) = capture_warn_logs(|| registry.dispose());

    ensure!(terminated == 2, "terminated {terminated} children");
    ensure!(registry.is_empty(), "dispose left {:?}", registry.live_pids());
    for handle in &handles {
        ensure!(!is_alive(handle.pid), "pid {} survived dispose", handle.pid);
        ensure!(
            !handle.data_directory.exists(),
            "{} survived dispose",
            handle.data_directory
        );
    }
    ensure!(
        logs.iter().any(|line| line.contains("terminated")),
        "expected a disposal warning, got {logs:?}"
    );

    first.stop()?;
    second.stop()?;
    ensure!(first.state() == SupervisorState::Stopped, "state is {:?}", first.state());
    Ok(())
}

#[test]
fn dispose_is_idempotent() -> Result<()> {
    let install = FakeMongodInstall::healthy()?;
    let registry = ProcessRegistry::new();
    let mut mongod = scripted_supervisor(fast_settings(&install), &registry);
    mongod.start()?;

    ensure!(registry.dispose() == 1, "first dispose missed the child");
    ensure!(registry.dispose() == 0, "second dispose found children");
    mongod.stop()?;
    Ok(())
}

#[test]
fn stopped_instances_are_not_disposed_twice() -> Result<()> {
    let install = FakeMongodInstall::healthy()?;
    let registry = ProcessRegistry::new();
    let mut mongod = scripted_supervisor(fast_settings(&install), &registry);
    mongod.start()?;
    mongod.stop()?;

    ensure!(registry.dispose() == 0, "stopped child was disposed");
    Ok(())
}

#[test]
fn supervisors_register_globally_by_default() -> Result<()> {
    let install = FakeMongodInstall::healthy()?;
    let mut mongod = MongodSupervisor::new(fast_settings(&install))
        .with_probe(Arc::new(ScriptedProbe::always_healthy()));
    mongod.start()?;
    let pid = mongod
        .handle()
        .ok_or_else(|| eyre!("started supervisor exposes a handle"))?
        .pid;

    ensure!(
        ProcessRegistry::global().contains(pid),
        "pid {pid} missing from the global registry"
    );
    mongod.stop()?;
    ensure!(
        !ProcessRegistry::global().contains(pid),
        "pid {pid} still registered after stop"
    );
    Ok(())
}

#[test]
fn exit_hooks_refuse_non_main_threads() {
    let err = install_exit_hooks().expect_err("libtest runs tests on worker threads");
    assert!(
        matches!(err, RegistryError::NotMainThread { .. }),
        "unexpected error: {err:?}"
    );
}
