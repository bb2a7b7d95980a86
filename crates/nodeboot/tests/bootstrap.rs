use nodeboot::{
    BootstrapController, BootstrapSettings, BootstrapSettingsBuilder, CORRUPT_DB_MESSAGE,
    DaemonDirectory, DaemonEvent, EventBus, HostTarget, Notification, ProcessId,
    SPAWN_FAILURE_MESSAGE, TerminationResult, UNSUPPORTED_PLATFORM_MESSAGE,
};
use nodeboot_core::testing::{FakeChild, FakeProcessManager, ProbeStep, ScriptedRpc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const TEMPLATE: &str = "rpcuser=reddwallet\nrpcpassword=$PASSWORD\nrpcport=45443\nserver=1\n";

struct Harness {
    root: TempDir,
    manager: FakeProcessManager,
    rpc: Arc<ScriptedRpc>,
    controller: Arc<BootstrapController>,
}

impl Harness {
    fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    fn pid_path(&self) -> PathBuf {
        self.path("app/daemon/reddwallet.pid")
    }

    fn config_path(&self) -> PathBuf {
        self.path("app/daemon/reddcoin.conf")
    }
}

fn init_logging() {
    // Only the first test in the binary installs the subscriber
    let _ = nodeboot::init_tracing(true);
}

fn install_binary(root: &Path, name: &str) -> PathBuf {
    let daemons = root.join("daemons");
    std::fs::create_dir_all(&daemons).unwrap();
    let binary = daemons.join(name);
    std::fs::write(&binary, "#!/bin/sh\n").unwrap();
    binary
}

fn install_template(root: &Path) {
    let daemons = root.join("daemons");
    std::fs::create_dir_all(&daemons).unwrap();
    std::fs::write(daemons.join("reddcoin.default.conf"), TEMPLATE).unwrap();
}

fn settings(root: &Path) -> BootstrapSettingsBuilder {
    let mut builder = BootstrapSettings::builder();
    builder
        .app_data_dir(root.join("app"))
        .binaries_root(root.join("daemons"));
    builder
}

fn harness_with(
    root: TempDir,
    host: HostTarget,
    builder: &BootstrapSettingsBuilder,
    manager: FakeProcessManager,
    rpc: ScriptedRpc,
) -> Harness {
    init_logging();
    let rpc = Arc::new(rpc);
    let controller = BootstrapController::with_host(
        builder.build().unwrap(),
        host,
        Arc::new(manager.clone()),
        rpc.clone(),
        EventBus::new(),
    )
    .unwrap();

    Harness {
        root,
        manager,
        rpc,
        controller: Arc::new(controller),
    }
}

/// Linux x64 host with the binary and template installed
fn harness(rpc: ScriptedRpc) -> Harness {
    harness_with_manager(FakeProcessManager::new(), rpc)
}

fn harness_with_manager(manager: FakeProcessManager, rpc: ScriptedRpc) -> Harness {
    let root = tempfile::tempdir().unwrap();
    install_binary(root.path(), "reddcoind-linux-64");
    install_template(root.path());
    let builder = settings(root.path());
    harness_with(root, HostTarget::new("linux", "x64"), &builder, manager, rpc)
}

async fn next_child(manager: &FakeProcessManager) -> FakeChild {
    for _ in 0..500 {
        if let Some(child) = manager.take_child() {
            return child;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon was never spawned");
}

async fn wait_until_removed(path: &Path) {
    for _ in 0..500 {
        if !path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} was never removed", path.display());
}

fn drain(subscriber: &mut broadcast::Receiver<DaemonEvent>) -> Vec<DaemonEvent> {
    let mut events = Vec::new();
    while let Ok(event) = subscriber.try_recv() {
        events.push(event);
    }
    events
}

fn block_count(events: &[DaemonEvent]) -> usize {
    events
        .iter()
        .filter(|event| **event == DaemonEvent::Notification(Notification::Block))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_ready_path_creates_config_and_records_pid() {
    let h = harness(ScriptedRpc::new([ProbeStep::Refused, ProbeStep::Refused, ProbeStep::Ok]));
    let mut subscriber = h.controller.events().subscribe();

    let result = h.controller.start_local().await;

    assert!(result.result);
    assert_eq!(result.code, 0);
    assert_eq!(result.message, "Daemon Ready");
    assert_eq!(h.rpc.probe_count(), 3);

    let spawned = h.manager.spawned();
    assert_eq!(spawned.len(), 1);
    let record = &spawned[0];
    assert_eq!(record.program, h.path("daemons/reddcoind-linux-64"));
    assert_eq!(
        record.args,
        vec![
            format!("-conf={}", h.config_path().display()),
            format!("-datadir={}", h.path("app/daemon").display()),
            "-alertnotify=echo \"ALERT:%s\"".to_string(),
            "-walletnotify=echo \"WALLET:%s\"".to_string(),
            "-blocknotify=echo \"BLOCK:%s\"".to_string(),
        ]
    );

    assert_eq!(
        std::fs::read_to_string(h.pid_path()).unwrap(),
        record.pid.to_string()
    );
    assert_eq!(h.controller.supervisor().current_pid(), Some(record.pid));

    let configured = h.rpc.configured().unwrap();
    let password = configured.get("rpcpassword").unwrap();
    assert_eq!(password.len(), 64);
    assert!(password.chars().all(|c| c.is_ascii_hexdigit()));

    let events = drain(&mut subscriber);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name(), "daemon.bootstrapped");
    assert!(h.controller.heartbeat_active());
}

#[cfg(unix)]
#[tokio::test(start_paused = true)]
async fn test_binary_made_executable() {
    use std::os::unix::fs::PermissionsExt;

    let h = harness(ScriptedRpc::always(ProbeStep::Ok));
    let binary = h.path("daemons/reddcoind-linux-64");
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o644)).unwrap();

    assert!(h.controller.start_local().await.result);

    let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o775);
}

#[cfg(unix)]
#[tokio::test(start_paused = true)]
async fn test_windows_host_skips_chmod() {
    use std::os::unix::fs::PermissionsExt;

    let root = tempfile::tempdir().unwrap();
    let binary = install_binary(root.path(), "reddcoind-win-32.exe");
    install_template(root.path());
    std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o644)).unwrap();
    let builder = settings(root.path());
    let h = harness_with(
        root,
        HostTarget::new("win32", "x64"),
        &builder,
        FakeProcessManager::new(),
        ScriptedRpc::always(ProbeStep::Ok),
    );

    assert!(h.controller.start_local().await.result);
    assert_eq!(h.manager.spawned()[0].program, binary);
    let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o644);
}

#[tokio::test(start_paused = true)]
async fn test_unencrypted_wallet_code_is_ready() {
    let h = harness(ScriptedRpc::new([ProbeStep::Refused, ProbeStep::Code(-15)]));

    let result = h.controller.start_local().await;

    assert_eq!(result.code, 0);
    assert_eq!(h.rpc.probe_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_platform_touches_nothing() {
    let root = tempfile::tempdir().unwrap();
    install_binary(root.path(), "reddcoind-linux-64");
    install_template(root.path());
    let builder = settings(root.path());
    let h = harness_with(
        root,
        HostTarget::new("sunos", "x64"),
        &builder,
        FakeProcessManager::new(),
        ScriptedRpc::always(ProbeStep::Ok),
    );
    let mut subscriber = h.controller.events().subscribe();

    let result = h.controller.start_local().await;

    assert!(!result.result);
    assert_eq!(result.code, 1);
    assert_eq!(result.message, UNSUPPORTED_PLATFORM_MESSAGE);
    assert!(!h.path("app").exists());
    assert!(h.manager.spawned().is_empty());
    assert_eq!(h.rpc.probe_count(), 0);

    match subscriber.try_recv().unwrap() {
        DaemonEvent::Bootstrapped(published) => assert_eq!(published, result),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_missing_binary_names_platform() {
    let root = tempfile::tempdir().unwrap();
    install_template(root.path());
    let builder = settings(root.path());
    let h = harness_with(
        root,
        HostTarget::new("linux", "x64"),
        &builder,
        FakeProcessManager::new(),
        ScriptedRpc::always(ProbeStep::Ok),
    );

    let result = h.controller.start_local().await;

    assert_eq!(result.code, 2);
    assert_eq!(
        result.message,
        "Cannot find the daemon for this operating system: linux x64"
    );
    assert!(!h.config_path().exists());
    assert!(h.manager.spawned().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_template_is_config_error() {
    let root = tempfile::tempdir().unwrap();
    install_binary(root.path(), "reddcoind-linux-64");
    let builder = settings(root.path());
    let h = harness_with(
        root,
        HostTarget::new("linux", "x64"),
        &builder,
        FakeProcessManager::new(),
        ScriptedRpc::always(ProbeStep::Ok),
    );

    let result = h.controller.start_local().await;

    assert_eq!(result.code, 4);
    assert!(!h.config_path().exists());
    assert!(h.manager.spawned().is_empty());
    assert!(h.rpc.configured().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_existing_config_is_kept() {
    let h = harness(ScriptedRpc::always(ProbeStep::Ok));
    std::fs::create_dir_all(h.path("app/daemon")).unwrap();
    let existing = "rpcuser=alice\nrpcpassword=hunter2\nrpcport=1234\nbad=line=here\n";
    std::fs::write(h.config_path(), existing).unwrap();

    assert!(h.controller.start_local().await.result);

    assert_eq!(std::fs::read_to_string(h.config_path()).unwrap(), existing);
    let configured = h.rpc.configured().unwrap();
    assert_eq!(configured.get("rpcpassword"), Some("hunter2"));
    assert_eq!(configured.get("rpcport"), Some("1234"));
    assert_eq!(configured.get("bad"), None);
}

#[tokio::test(start_paused = true)]
async fn test_custom_daemon_directory() {
    let root = tempfile::tempdir().unwrap();
    install_binary(root.path(), "reddcoind-linux-64");
    install_template(root.path());
    let custom = root.path().join("custom-node");
    let mut builder = settings(root.path());
    builder.daemon_directory(DaemonDirectory::Custom(custom.clone()));
    let h = harness_with(
        root,
        HostTarget::new("linux", "x64"),
        &builder,
        FakeProcessManager::new(),
        ScriptedRpc::always(ProbeStep::Ok),
    );

    assert!(h.controller.start_local().await.result);

    assert!(custom.join("reddcoin.conf").exists());
    assert!(custom.join("reddwallet.pid").exists());
    assert!(!h.path("app/daemon").exists());
    assert!(
        h.manager.spawned()[0]
            .args
            .contains(&format!("-datadir={}", custom.display()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_daemon_is_killed_before_spawn() {
    let manager = FakeProcessManager::new().with_running(777);
    let h = harness_with_manager(manager, ScriptedRpc::always(ProbeStep::Ok));
    std::fs::create_dir_all(h.path("app/daemon")).unwrap();
    std::fs::write(h.pid_path(), "777").unwrap();

    assert!(h.controller.start_local().await.result);

    assert_eq!(h.manager.terminated(), vec![ProcessId::new(777)]);
    assert!(!h.manager.is_running(ProcessId::new(777)));
    let new_pid = h.manager.spawned()[0].pid;
    assert_eq!(
        std::fs::read_to_string(h.pid_path()).unwrap(),
        new_pid.to_string()
    );
}

#[tokio::test(start_paused = true)]
async fn test_stale_pid_without_process_is_ignored() {
    let h = harness(ScriptedRpc::always(ProbeStep::Ok));
    std::fs::create_dir_all(h.path("app/daemon")).unwrap();
    std::fs::write(h.pid_path(), "31337\n").unwrap();

    assert!(h.controller.start_local().await.result);
    assert_eq!(h.manager.terminated(), vec![ProcessId::new(31337)]);
    assert_eq!(h.manager.spawned().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_spawn_failure_has_operator_message() {
    let manager = FakeProcessManager::new().fail_spawns("Permission denied (os error 13)");
    let h = harness_with_manager(manager, ScriptedRpc::always(ProbeStep::Ok));

    let result = h.controller.start_local().await;

    assert_eq!(result.code, 2);
    assert_eq!(result.message, SPAWN_FAILURE_MESSAGE);
    assert!(!h.pid_path().exists());
    assert_eq!(h.rpc.probe_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_any_stderr_line_fails_bootstrap_and_stops_polling() {
    let h = harness(ScriptedRpc::always(ProbeStep::Refused));
    let controller = h.controller.clone();
    let start = tokio::spawn(async move { controller.start_local().await });

    let mut child = next_child(&h.manager).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    child.write_stderr("init message: loading wallet").await;

    let result = start.await.unwrap();
    assert!(!result.result);
    assert_eq!(result.code, 2);
    assert_eq!(result.message, "init message: loading wallet");

    let probes = h.rpc.probe_count();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.rpc.probe_count(), probes);
    assert!(!h.controller.heartbeat_active());
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_database_message() {
    let h = harness(ScriptedRpc::always(ProbeStep::Refused));
    let controller = h.controller.clone();
    let start = tokio::spawn(async move { controller.start_local().await });

    let mut child = next_child(&h.manager).await;
    child
        .write_stderr("Error: Corrupted block database detected")
        .await;

    let result = start.await.unwrap();
    assert_eq!(result.code, 2);
    assert_eq!(result.message, CORRUPT_DB_MESSAGE);
}

#[tokio::test(start_paused = true)]
async fn test_stderr_after_ready_does_not_re_resolve() {
    let h = harness(ScriptedRpc::always(ProbeStep::Ok));
    let mut subscriber = h.controller.events().subscribe();

    assert!(h.controller.start_local().await.result);
    let mut child = next_child(&h.manager).await;
    child.write_stderr("Error: something late").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let bootstrapped = drain(&mut subscriber)
        .iter()
        .filter(|event| matches!(event, DaemonEvent::Bootstrapped(_)))
        .count();
    assert_eq!(bootstrapped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stdout_notifications_are_relayed() {
    let h = harness(ScriptedRpc::always(ProbeStep::Ok));
    let mut subscriber = h.controller.events().subscribe();
    assert!(h.controller.start_local().await.result);
    drain(&mut subscriber);

    let mut child = next_child(&h.manager).await;
    child.write_stdout("BLOCK:0000000000abc WALLET:ff").await;
    child.write_stdout("ALERT:network upgrade").await;
    child.write_stdout("WALLET:d00d").await;
    child.write_stdout("ThreadRPCServer method=walletlock").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let names: Vec<&str> = drain(&mut subscriber).iter().map(DaemonEvent::name).collect();
    assert_eq!(
        names,
        vec![
            "daemon.notifications.block",
            "daemon.notifications.alert",
            "daemon.notifications.wallet"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_emits_block_until_teardown() {
    let root = tempfile::tempdir().unwrap();
    install_binary(root.path(), "reddcoind-linux-64");
    install_template(root.path());
    let mut builder = settings(root.path());
    builder.heartbeat_interval(Duration::from_secs(60));
    let h = harness_with(
        root,
        HostTarget::new("linux", "x64"),
        &builder,
        FakeProcessManager::new(),
        ScriptedRpc::always(ProbeStep::Ok),
    );
    let mut subscriber = h.controller.events().subscribe();

    assert!(h.controller.start_local().await.result);
    drain(&mut subscriber);

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(block_count(&drain(&mut subscriber)), 0);

    tokio::time::sleep(Duration::from_secs(62)).await;
    assert_eq!(block_count(&drain(&mut subscriber)), 2);

    h.controller.teardown();
    assert!(!h.controller.heartbeat_active());
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(block_count(&drain(&mut subscriber)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_signals_daemon_and_exit_removes_pid() {
    let h = harness(ScriptedRpc::always(ProbeStep::Ok));
    assert!(h.controller.start_local().await.result);
    let pid = h.controller.supervisor().current_pid().unwrap();

    let termination = h.controller.teardown().unwrap();
    assert_eq!(termination.await.unwrap(), TerminationResult::Success);
    assert_eq!(h.manager.terminated(), vec![pid]);

    wait_until_removed(&h.pid_path()).await;
    assert_eq!(h.controller.supervisor().current_pid(), None);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_exit_after_ready_is_not_a_failure() {
    let h = harness(ScriptedRpc::always(ProbeStep::Ok));
    let mut subscriber = h.controller.events().subscribe();
    assert!(h.controller.start_local().await.result);
    let pid = h.controller.supervisor().current_pid().unwrap();

    assert!(h.manager.exit(pid, 1));
    wait_until_removed(&h.pid_path()).await;

    let bootstrapped: Vec<_> = drain(&mut subscriber)
        .into_iter()
        .filter(|event| matches!(event, DaemonEvent::Bootstrapped(_)))
        .collect();
    assert_eq!(bootstrapped.len(), 1);
    assert_eq!(h.controller.supervisor().current_pid(), None);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_while_polling_cancels_bootstrap() {
    let h = harness(ScriptedRpc::always(ProbeStep::Refused));
    let controller = h.controller.clone();
    let start = tokio::spawn(async move { controller.start_local().await });

    next_child(&h.manager).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    h.controller.teardown();

    let result = start.await.unwrap();
    assert_eq!(result.code, 2);
    assert_eq!(result.message, "Daemon start-up was cancelled.");
    assert!(h.manager.spawned().iter().all(|record| !h.manager.is_running(record.pid)));
}

#[tokio::test(start_paused = true)]
async fn test_second_start_leaves_running_daemon_alone() {
    let h = harness(ScriptedRpc::always(ProbeStep::Ok));
    assert!(h.controller.start_local().await.result);
    let pid = h.controller.supervisor().current_pid().unwrap();

    let second = h.controller.start_local().await;

    assert!(!second.result);
    assert_eq!(second.code, 2);
    assert_eq!(second.message, SPAWN_FAILURE_MESSAGE);
    assert!(h.manager.terminated().is_empty());
    assert_eq!(h.manager.spawned().len(), 1);
    assert!(h.manager.is_running(pid));
    assert_eq!(h.controller.supervisor().current_pid(), Some(pid));
    assert_eq!(std::fs::read_to_string(h.pid_path()).unwrap(), pid.to_string());
}

#[tokio::test(start_paused = true)]
async fn test_start_after_teardown_spawns_nothing() {
    let h = harness(ScriptedRpc::always(ProbeStep::Ok));
    assert!(h.controller.teardown().is_none());

    let result = h.controller.start_local().await;

    assert_eq!(result.code, 2);
    assert_eq!(result.message, "Daemon start-up was cancelled.");
    assert!(h.manager.spawned().is_empty());
    assert!(!h.config_path().exists());
    assert_eq!(h.rpc.probe_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_probe_attempt_limit() {
    let root = tempfile::tempdir().unwrap();
    install_binary(root.path(), "reddcoind-linux-64");
    install_template(root.path());
    let mut builder = settings(root.path());
    builder.probe_attempt_limit(3u32);
    let h = harness_with(
        root,
        HostTarget::new("linux", "x64"),
        &builder,
        FakeProcessManager::new(),
        ScriptedRpc::always(ProbeStep::Refused),
    );

    let result = h.controller.start_local().await;

    assert_eq!(result.code, 2);
    assert_eq!(
        result.message,
        "The daemon did not become ready after 3 attempts."
    );
    assert_eq!(h.rpc.probe_count(), 3);
}

#[test]
fn test_invalid_settings_are_rejected() {
    let root = tempfile::tempdir().unwrap();
    let mut builder = settings(root.path());
    builder.probe_interval(Duration::ZERO);

    let result = BootstrapController::with_host(
        builder.build().unwrap(),
        HostTarget::new("linux", "x64"),
        Arc::new(FakeProcessManager::new()),
        Arc::new(ScriptedRpc::always(ProbeStep::Ok)),
        EventBus::new(),
    );
    assert!(result.is_err());
}
