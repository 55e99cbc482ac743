mod common;
use common::{quiet_logger, shell_words, FakeHost};

use proxmox_mcp::errors::CoreError;
use proxmox_mcp::services::pct::{PctAdapter, TargetState, Vmid};
use proxmox_mcp::services::transport::RemoteTransport;
use std::sync::Arc;
use std::time::Duration;

fn adapter(host: &Arc<FakeHost>) -> PctAdapter {
    let transport: Arc<dyn RemoteTransport> = host.clone();
    PctAdapter::new(transport, quiet_logger())
}

fn fleet() -> Arc<FakeHost> {
    Arc::new(
        FakeHost::new()
            .with_container(100, "web", true)
            .with_container(101, "db", false)
            .with_container(102, "cache", true),
    )
}

#[test]
fn fake_shell_unquotes_like_posix_sh() {
    assert_eq!(
        shell_words(r#"pct exec 100 -- bash -c 'echo '\''hi'\'' | wc -c'"#),
        vec!["pct", "exec", "100", "--", "bash", "-c", "echo 'hi' | wc -c"]
    );
    assert_eq!(shell_words("test -f ''"), vec!["test", "-f", ""]);
}

#[tokio::test]
async fn list_reads_every_container() {
    let host = fleet();
    let records = adapter(&host).list().await.expect("list");
    let summary: Vec<(u32, TargetState, &str)> = records
        .iter()
        .map(|r| (r.vmid, r.status, r.name.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (100, TargetState::Running, "web"),
            (101, TargetState::Stopped, "db"),
            (102, TargetState::Running, "cache"),
        ]
    );
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let host = fleet();
    let pct = adapter(&host);

    let first = pct.start(Vmid(101)).await.expect("start");
    assert!(first.changed);
    assert_eq!(first.state, TargetState::Running);
    let second = pct.start(Vmid(101)).await.expect("start again");
    assert!(!second.changed);
    assert_eq!(pct.status(Vmid(101)).await.expect("status"), TargetState::Running);

    let stopped = pct.stop(Vmid(100)).await.expect("stop");
    assert!(stopped.changed);
    let again = pct.stop(Vmid(100)).await.expect("stop again");
    assert!(!again.changed);
    assert_eq!(
        host.exec_log()
            .iter()
            .filter(|line| line.as_str() == "pct stop 100")
            .count(),
        1
    );
}

#[tokio::test]
async fn lifecycle_race_with_already_running_counts_as_unchanged() {
    let host = fleet();
    host.script(
        "pct status 102",
        proxmox_mcp::services::transport::CommandResult::completed("status: stopped\n", "", 0),
    );
    let outcome = adapter(&host).start(Vmid(102)).await.expect("start");
    assert!(!outcome.changed);
    assert_eq!(outcome.state, TargetState::Running);
}

#[tokio::test]
async fn unknown_container_is_target_not_found() {
    let host = fleet();
    let pct = adapter(&host);
    assert!(matches!(
        pct.status(Vmid(999)).await,
        Err(CoreError::TargetNotFound { vmid: 999 })
    ));
    assert!(matches!(
        pct.start(Vmid(999)).await,
        Err(CoreError::TargetNotFound { vmid: 999 })
    ));
    assert!(matches!(
        pct.run(Vmid(999), "uptime", Duration::from_secs(5)).await,
        Err(CoreError::TargetNotFound { vmid: 999 })
    ));
}

#[tokio::test]
async fn run_delivers_command_text_verbatim() {
    let host = fleet();
    let pct = adapter(&host);
    let commands = [
        "echo 'single' \"double\" $HOME `id`",
        "printf '%s\\n' a;b && c || d > /tmp/x",
        "it's a \\ backslash and a\nnewline",
        "",
    ];
    for command in commands {
        pct.run(Vmid(100), command, Duration::from_secs(5))
            .await
            .expect("run");
    }
    assert_eq!(host.inner_commands(), commands.to_vec());
}

#[tokio::test]
async fn run_returns_non_zero_exit_untouched() {
    let host = fleet();
    let result = adapter(&host)
        .run(Vmid(100), "exit 3", Duration::from_secs(5))
        .await
        .expect("result");
    assert_eq!(result.exit_code, 3);
    assert!(!result.success());

    let result = adapter(&host)
        .run(Vmid(100), "echo hello", Duration::from_secs(5))
        .await
        .expect("result");
    assert_eq!(result.stdout, "hello\n");
}

#[tokio::test]
async fn probes_and_modes_through_pct_exec() {
    let host = fleet();
    host.put_container_file(100, "/etc/ssl/key.pem", b"k", 0o600);
    let pct = adapter(&host);
    assert!(pct.file_exists(Vmid(100), "/etc/ssl/key.pem").await.expect("probe"));
    assert!(!pct.file_exists(Vmid(100), "/etc/ssl/none").await.expect("probe"));
    assert_eq!(
        pct.file_mode(Vmid(100), "/etc/ssl/key.pem").await.expect("mode"),
        Some(0o600)
    );
    pct.chmod(Vmid(100), "640", "/etc/ssl/key.pem")
        .await
        .expect("chmod");
    assert_eq!(host.container_file(100, "/etc/ssl/key.pem").expect("f").mode, 0o640);

    let err = pct
        .chmod(Vmid(100), "640", "/etc/ssl/missing")
        .await
        .expect_err("missing file");
    assert!(matches!(err, CoreError::IndirectionFailed { exit_code: 1, .. }));
}
