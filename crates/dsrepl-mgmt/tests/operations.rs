//! End-to-end runs of the sub-commands against in-process servers.

mod common;

use common::{
    enable, enable_between, network, run, run_with, shift_replication_ids, ADMIN_PASSWORD, BASE_DN, OTHER_BASE_DN,
    ROOT_DN, ROOT_PASSWORD,
};
use dsrepl_mgmt::ads::{administrator_dn, SERVERS_DN};
use dsrepl_mgmt::cache::read_registry;
use dsrepl_mgmt::directory::memory::TaskStep;
use dsrepl_mgmt::directory::Entry;
use dsrepl_mgmt::server_config::{domain_dn, REPLICATION_SERVER_DN};
use dsrepl_mgmt::tasks::SCHEDULED_TASKS_DN;
use dsrepl_mgmt::ReturnCode;
use std::io::Write;
use tempfile::NamedTempFile;

fn peers(network: &dsrepl_mgmt::directory::memory::MemoryNetwork, address: &str, entry_dn: &str) -> Vec<String> {
    network
        .entry(address, entry_dn)
        .map(|e| e.values("ds-cfg-replication-server").to_vec())
        .unwrap_or_default()
}

fn task_dn(id: &str) -> String {
    format!("ds-task-id={},{}", id, SCHEDULED_TASKS_DN)
}

#[tokio::test]
async fn test_enable_between_fresh_servers() {
    let network = network(2, &[BASE_DN]);
    let outcome = enable(&network, "ds2", &[BASE_DN]).await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    assert!(outcome.out.contains("Replication has been enabled between ds1:4444 and ds2:4444."));

    for address in ["ds1:4444", "ds2:4444"] {
        let rs = peers(&network, address, REPLICATION_SERVER_DN);
        assert_eq!(rs.len(), 1, "{} peers: {:?}", address, rs);
        let domain = peers(&network, address, &domain_dn(BASE_DN));
        assert!(domain.contains(&"ds1:8989".to_string()));
        assert!(domain.contains(&"ds2:8989".to_string()));
        assert!(network.entry(address, &domain_dn("cn=admin data")).is_some());
        assert!(network.entry(address, &domain_dn("cn=schema")).is_some());
    }

    // Registry and schema come from the first server.
    assert!(network.entry("ds2:4444", &administrator_dn("admin")).is_some());
    let schema = network.entry("ds2:4444", "cn=schema").unwrap();
    assert_eq!(schema.first("ds-sync-generation-id"), Some("schema-1"));
    assert!(network
        .entry("ds2:4444", "ds-cfg-key-id=key-ds1,cn=ads-truststore")
        .is_some());
    assert!(network
        .entry("ds1:4444", "ds-cfg-key-id=key-ds2,cn=ads-truststore")
        .is_some());
}

#[tokio::test]
async fn test_registry_shared_after_enable() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());

    let registry = read_registry(&network.directory("ds2:4444")).await.unwrap().unwrap();
    let ids: Vec<&str> = registry.servers.iter().map(|s| s.id.as_str()).collect();
    assert!(ids.contains(&"ds1:4444"));
    assert!(ids.contains(&"ds2:4444"));
    assert!(registry.administrators.iter().any(|a| a.uid == "admin"));
    assert_eq!(registry.instance_keys.len(), 2);
}

fn registered(registry: &dsrepl_topology::registry::Registry) -> Vec<&str> {
    registry.servers.iter().map(|s| s.id.as_str()).collect()
}

#[tokio::test]
async fn test_enable_merges_two_topologies() {
    let network = network(4, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    assert!(enable_between(&network, "ds3", "ds4", &[BASE_DN]).await.result.is_ok());
    shift_replication_ids(&network, "ds3:4444", 100).await;
    shift_replication_ids(&network, "ds4:4444", 100).await;

    let outcome = enable(&network, "ds3", &[BASE_DN]).await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);

    let registry = read_registry(&network.directory("ds1:4444")).await.unwrap().unwrap();
    let ids = registered(&registry);
    for id in ["ds1:4444", "ds2:4444", "ds3:4444", "ds4:4444"] {
        assert!(ids.contains(&id), "{} missing from {:?}", id, ids);
    }
    for host in ["ds3", "ds4"] {
        for n in 1..=4 {
            let key = format!("ds-cfg-key-id=key-ds{},cn=ads-truststore", n);
            assert!(
                network.entry(&format!("{}:4444", host), &key).is_some(),
                "{} does not trust key-ds{}",
                host,
                n
            );
        }
    }
    assert!(network
        .entry("ds1:4444", "ds-cfg-key-id=key-ds3,cn=ads-truststore")
        .is_some());
    assert!(peers(&network, "ds1:4444", REPLICATION_SERVER_DN).contains(&"ds3:8989".to_string()));
}

#[tokio::test]
async fn test_enable_refuses_to_merge_colliding_topologies() {
    let network = network(4, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    assert!(enable_between(&network, "ds3", "ds4", &[BASE_DN]).await.result.is_ok());
    let ds1_peers = peers(&network, "ds1:4444", REPLICATION_SERVER_DN);
    let ds3_peers = peers(&network, "ds3:4444", REPLICATION_SERVER_DN);

    let outcome = enable(&network, "ds3", &[BASE_DN]).await;
    assert_eq!(outcome.code(), ReturnCode::ReplicationAdsMergeNotSupported, "{}", outcome.err);

    assert_eq!(peers(&network, "ds1:4444", REPLICATION_SERVER_DN), ds1_peers);
    assert_eq!(peers(&network, "ds3:4444", REPLICATION_SERVER_DN), ds3_peers);
    let first = read_registry(&network.directory("ds1:4444")).await.unwrap().unwrap();
    assert!(!registered(&first).contains(&"ds3:4444"));
    let second = read_registry(&network.directory("ds3:4444")).await.unwrap().unwrap();
    assert!(!registered(&second).contains(&"ds1:4444"));
    assert!(network
        .entry("ds3:4444", "ds-cfg-key-id=key-ds1,cn=ads-truststore")
        .is_none());
}

#[tokio::test]
async fn test_second_enable_is_a_no_op() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    let before = peers(&network, "ds1:4444", REPLICATION_SERVER_DN);

    let again = enable(&network, "ds2", &[BASE_DN]).await;
    assert_eq!(again.code(), ReturnCode::SuccessfulNop);
    assert!(again.code().is_success());
    assert_eq!(peers(&network, "ds1:4444", REPLICATION_SERVER_DN), before);
}

#[tokio::test]
async fn test_enable_third_server_updates_existing_peers() {
    let network = network(3, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    let outcome = enable(&network, "ds3", &[BASE_DN]).await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);

    let ds2_rs = peers(&network, "ds2:4444", REPLICATION_SERVER_DN);
    assert!(ds2_rs.contains(&"ds3:8989".to_string()), "{:?}", ds2_rs);
    let ds2_domain = peers(&network, "ds2:4444", &domain_dn(BASE_DN));
    assert!(ds2_domain.contains(&"ds3:8989".to_string()));
    assert!(network
        .entry("ds1:4444", &format!("cn=ds3:4444,{}", SERVERS_DN))
        .is_some());
}

#[tokio::test]
async fn test_enable_unknown_base_dn() {
    let network = network(2, &[BASE_DN]);
    let outcome = enable(&network, "ds2", &["dc=missing"]).await;
    assert_eq!(outcome.code(), ReturnCode::ReplicationCannotBeEnabledOnBaseDn);
    assert!(network.entry("ds1:4444", REPLICATION_SERVER_DN).is_none());
}

#[tokio::test]
async fn test_partial_disable_keeps_other_base_dns() {
    let network = network(2, &[BASE_DN, OTHER_BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN, OTHER_BASE_DN]).await.result.is_ok());

    let outcome = run(
        &network,
        &["disable", "-n", "--hostname", "ds2", "-p", "4444", "-w", ADMIN_PASSWORD, "-b", OTHER_BASE_DN],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    assert!(network.entry("ds2:4444", &domain_dn(OTHER_BASE_DN)).is_none());
    assert!(network.entry("ds2:4444", &domain_dn(BASE_DN)).is_some());
    assert!(network.entry("ds2:4444", REPLICATION_SERVER_DN).is_some());
    assert!(network.entry("ds1:4444", &domain_dn(OTHER_BASE_DN)).is_some());
}

#[tokio::test]
async fn test_disable_all_removes_references() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());

    let outcome = run(
        &network,
        &["disable", "-n", "--hostname", "ds2", "-p", "4444", "-w", ADMIN_PASSWORD, "-a"],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    assert!(outcome.err.contains("Only one replication server will be left"));

    assert!(network.entry("ds2:4444", REPLICATION_SERVER_DN).is_none());
    assert!(network.entry("ds2:4444", &domain_dn(BASE_DN)).is_none());
    assert!(!peers(&network, "ds1:4444", REPLICATION_SERVER_DN).contains(&"ds2:8989".to_string()));
    assert_eq!(peers(&network, "ds1:4444", &domain_dn(BASE_DN)), vec!["ds1:8989".to_string()]);
    assert!(network
        .entry("ds1:4444", &format!("cn=ds2:4444,{}", SERVERS_DN))
        .is_none());
}

#[tokio::test]
async fn test_disable_without_administrator_warns_about_skipped_checks() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());

    let outcome = run(
        &network,
        &[
            "disable", "-n", "--hostname", "ds2", "-p", "4444", "-D", ROOT_DN, "-w", ROOT_PASSWORD, "-a",
        ],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    assert!(outcome.err.contains("last replication server check"), "{}", outcome.err);
    assert!(network.entry("ds2:4444", REPLICATION_SERVER_DN).is_none());
    // ds1 was not reached.
    assert!(peers(&network, "ds1:4444", REPLICATION_SERVER_DN).contains(&"ds2:8989".to_string()));
}

#[tokio::test]
async fn test_disable_last_replication_server_is_refused() {
    let network = network(2, &[BASE_DN]);
    let mut args = vec![
        "enable", "-n", "--host1", "ds1", "--port1", "4444", "--bindPassword1", "password", "-O", "ds2",
        "--port2", "4444", "--bindPassword2", "password", "--noReplicationServer2", "-w", ADMIN_PASSWORD,
    ];
    args.extend(["-b", BASE_DN]);
    let enabled = run(&network, &args).await;
    assert_eq!(enabled.code(), ReturnCode::Successful, "{}", enabled.err);
    assert!(network.entry("ds2:4444", REPLICATION_SERVER_DN).is_none());

    let outcome = run(
        &network,
        &[
            "disable",
            "-n",
            "--hostname",
            "ds1",
            "-p",
            "4444",
            "-w",
            ADMIN_PASSWORD,
            "--disableReplicationServer",
        ],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::ReplicationCannotBeDisabledOnBaseDn);
    assert!(network.entry("ds1:4444", REPLICATION_SERVER_DN).is_some());
}

#[tokio::test]
async fn test_initialize_copies_entries() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    network.seed(
        "ds1:4444",
        vec![Entry::new("uid=jdoe,dc=example,dc=com").with("objectclass", ["top", "person"])],
    );

    let outcome = run(
        &network,
        &[
            "initialize", "-n", "--hostSource", "ds1", "--portSource", "4444", "-O", "ds2",
            "--portDestination", "4444", "-w", ADMIN_PASSWORD, "-b", BASE_DN,
        ],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    assert!(network.entry("ds2:4444", "uid=jdoe,dc=example,dc=com").is_some());
}

fn initialize_args() -> Vec<&'static str> {
    vec![
        "initialize", "-n", "--hostSource", "ds1", "--portSource", "4444", "-O", "ds2",
        "--portDestination", "4444", "-w", ADMIN_PASSWORD, "-b", BASE_DN,
    ]
}

fn peer_not_found() -> Vec<TaskStep> {
    vec![
        TaskStep::state("RUNNING"),
        TaskStep::with_log("STOPPED_BY_ERROR", "No reachable peer in the domain dc=example,dc=com"),
    ]
}

#[tokio::test]
async fn test_initialize_retries_until_peer_is_reachable() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    network.script_task("ds2:4444", peer_not_found());
    network.script_task("ds2:4444", peer_not_found());

    // Enable already ran two initializations on ds2: attempts are 3, 4 and 5.
    let outcome = run(&network, &initialize_args()).await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    let last = network
        .entry("ds2:4444", &task_dn("dsreplication-initialize-5"))
        .unwrap();
    assert_eq!(last.first("ds-task-state"), Some("COMPLETED_SUCCESSFULLY"));
    assert!(network
        .entry("ds2:4444", &task_dn("dsreplication-initialize-6"))
        .is_none());
}

#[tokio::test]
async fn test_initialize_gives_up_after_the_last_attempt() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    let mut config = common::config();
    config.initialize_attempts = 2;
    for _ in 0..2 {
        network.script_task("ds2:4444", peer_not_found());
    }

    let outcome = run_with(&network, config, &initialize_args()).await;
    assert_eq!(outcome.code(), ReturnCode::InitializingTriesCompleted);
}

#[tokio::test]
async fn test_task_id_collision_moves_to_next_id() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    network.seed(
        "ds1:4444",
        vec![Entry::new(task_dn("dsreplication-initialize-all-1"))
            .with("objectclass", ["top", "ds-task"])
            .with("ds-task-state", ["COMPLETED_SUCCESSFULLY"])],
    );

    let outcome = run(
        &network,
        &["initialize-all", "-n", "--hostname", "ds1", "-p", "4444", "-w", ADMIN_PASSWORD, "-b", BASE_DN],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    let task = network
        .entry("ds1:4444", &task_dn("dsreplication-initialize-all-2"))
        .unwrap();
    assert_eq!(task.first("ds-task-initialize-domain-dn"), Some(BASE_DN));
}

#[tokio::test]
async fn test_pre_external_initialization_resets_generation_id() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());

    let outcome = run(
        &network,
        &[
            "pre-external-initialization", "-n", "--hostname", "ds1", "-p", "4444", "-w", ADMIN_PASSWORD,
            "-b", BASE_DN,
        ],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    let task = network
        .entry("ds1:4444", &task_dn("dsreplication-reset-generation-id-1"))
        .unwrap();
    assert_eq!(task.first("ds-task-reset-generation-id-new-value"), Some("-1"));

    let outcome = run(
        &network,
        &[
            "post-external-initialization", "-n", "--hostname", "ds1", "-p", "4444", "-w", ADMIN_PASSWORD,
            "-b", BASE_DN,
        ],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    let task = network
        .entry("ds1:4444", &task_dn("dsreplication-reset-generation-id-2"))
        .unwrap();
    assert_eq!(task.first("ds-task-reset-generation-id-new-value"), None);
}

#[tokio::test]
async fn test_reset_change_number() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    network.seed(
        "ds1:4444",
        vec![
            Entry::new("")
                .with("objectclass", ["top", "ds-root-dse"])
                .with("lastChangeNumber", ["42"]),
            Entry::new("cn=changelog").with("objectclass", ["top", "container"]),
            Entry::new("changeNumber=42,cn=changelog")
                .with("replicationCSN", ["0000017f2c3a4b5c00010001"])
                .with("targetDN", ["uid=jdoe,dc=example,dc=com"]),
        ],
    );

    let outcome = run(
        &network,
        &[
            "reset-change-number", "-n", "--hostSource", "ds1", "--portSource", "4444", "-O", "ds2",
            "--portDestination", "4444", "-w", ADMIN_PASSWORD,
        ],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    let task = network
        .entry("ds2:4444", &task_dn("dsreplication-reset-change-number-1"))
        .unwrap();
    assert_eq!(task.first("ds-task-reset-change-number-to"), Some("42"));
    assert_eq!(task.first("ds-task-reset-change-number-base-dn"), Some(BASE_DN));
}

#[tokio::test]
async fn test_status_script_friendly() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());

    let outcome = run(
        &network,
        &["status", "-n", "--hostname", "ds1", "-p", "4444", "-w", ADMIN_PASSWORD, "-s"],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    let lines: Vec<&str> = outcome.out.lines().collect();
    assert!(lines[0].starts_with("Suffix DN\tServer"));
    assert!(lines.iter().any(|l| l.starts_with("dc=example,dc=com\tds1:4444\t")));
    assert!(lines.iter().any(|l| l.starts_with("dc=example,dc=com\tds2:4444\t")));
    assert!(!outcome.out.contains("cn=admin data"));
}

#[tokio::test]
async fn test_online_purge_launches_one_task_per_base_dn() {
    let network = network(2, &[BASE_DN, OTHER_BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN, OTHER_BASE_DN]).await.result.is_ok());

    let outcome = run(
        &network,
        &[
            "purge-historical", "-n", "--hostname", "ds1", "-p", "4444", "-w", ADMIN_PASSWORD, "-b", BASE_DN,
            "-b", OTHER_BASE_DN, "--maximumDuration", "60",
        ],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    for id in ["dsreplication-purge-historical-1", "dsreplication-purge-historical-2"] {
        let task = network.entry("ds1:4444", &task_dn(id)).unwrap();
        assert_eq!(
            task.first("ds-task-purge-conflicts-historical-maximum-duration"),
            Some("60")
        );
    }
}

#[tokio::test]
async fn test_scheduled_purge_is_not_waited_for() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());
    network.script_task("ds1:4444", vec![TaskStep::state("RUNNING")]);

    let outcome = run(
        &network,
        &[
            "purge-historical", "-n", "--hostname", "ds1", "-p", "4444", "-w", ADMIN_PASSWORD, "-b", BASE_DN,
            "-t", "20300101000000",
        ],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);
    assert!(outcome.out.contains("scheduled"));
    let task = network
        .entry("ds1:4444", &task_dn("dsreplication-purge-historical-1"))
        .unwrap();
    assert_eq!(task.first("ds-task-scheduled-start-time"), Some("20300101000000"));
}

const LOCAL_CONFIG: &str = "\
dn: cn=config
objectClass: top

dn: cn=Backends,cn=config
objectClass: top

dn: ds-cfg-backend-id=userRoot,cn=Backends,cn=config
objectClass: top
ds-cfg-backend-id: userRoot
ds-cfg-base-dn: dc=example,dc=com
ds-cfg-enabled: true
";

const LOCAL_DOMAIN: &str = "
dn: cn=Synchronization Providers,cn=config
objectClass: top

dn: cn=Multimaster Synchronization,cn=Synchronization Providers,cn=config
objectClass: top
ds-cfg-enabled: true

dn: cn=domains,cn=Multimaster Synchronization,cn=Synchronization Providers,cn=config
objectClass: top

dn: cn=example,cn=domains,cn=Multimaster Synchronization,cn=Synchronization Providers,cn=config
objectClass: top
ds-cfg-base-dn: dc=example,dc=com
ds-cfg-server-id: 11
ds-cfg-replication-server: ds1:8989
";

fn local_config(text: &str, command: Option<&str>) -> (NamedTempFile, dsrepl_mgmt::ToolConfig) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    let config = dsrepl_mgmt::ToolConfig {
        local_config_ldif: file.path().to_path_buf(),
        offline_purge_command: command.map(Into::into),
        ..common::config()
    };
    (file, config)
}

#[tokio::test]
async fn test_offline_purge_without_replication_never_connects() {
    let network = network(1, &[BASE_DN]);
    let (_file, config) = local_config(LOCAL_CONFIG, Some("true"));

    let outcome = run_with(&network, config, &["purge-historical", "-n", "--offline", "-b", BASE_DN]).await;
    assert_eq!(outcome.code(), ReturnCode::HistoricalCannotBePurgedOnBaseDn);
    assert_eq!(network.connections(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_offline_purge_runs_local_command() {
    let network = network(1, &[BASE_DN]);
    let text = format!("{}{}", LOCAL_CONFIG, LOCAL_DOMAIN);

    let (_file, config) = local_config(&text, Some("true"));
    let outcome = run_with(&network, config, &["purge-historical", "-n", "--offline", "-b", BASE_DN]).await;
    assert_eq!(outcome.code(), ReturnCode::Successful, "{}", outcome.err);

    let (_file, config) = local_config(&text, Some("false"));
    let outcome = run_with(&network, config, &["purge-historical", "-n", "--offline", "-b", BASE_DN]).await;
    assert_eq!(outcome.code(), ReturnCode::ErrorLocalPurgeHistorical);
    assert_eq!(network.connections(), 0);
}

#[tokio::test]
async fn test_wrong_administrator_password() {
    let network = network(2, &[BASE_DN]);
    assert!(enable(&network, "ds2", &[BASE_DN]).await.result.is_ok());

    let outcome = run(
        &network,
        &["status", "-n", "--hostname", "ds1", "-p", "4444", "-w", "wrong"],
    )
    .await;
    assert_eq!(outcome.code(), ReturnCode::ErrorConnecting);
    assert_eq!(outcome.code().code(), 4);
}
