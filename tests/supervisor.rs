use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use craftsman::config::BackupSettings;
use craftsman::provider::{
    PortMap, Provider, ProviderKind, ProviderStatus, RconResult, StartOptions, StartResult,
    StopOutcome,
};
use craftsman::supervisor::read_runtime;
use craftsman::{
    AppError, CreatePak, DataLayout, ErrorCategory, ErrorKind, Extension, ExtensionCache,
    PakStore, ServerType, Settings, StartOverrides, Supervisor,
};

/// In-memory provider recording every call it receives.
#[derive(Default)]
struct FakeProvider {
    units: Mutex<HashMap<String, StartOptions>>,
    calls: Mutex<Vec<String>>,
    failing_versions: Mutex<Vec<String>>,
}

impl FakeProvider {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn starts(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("start")).count()
    }

    fn last_options(&self, name: &str) -> Option<StartOptions> {
        self.units.lock().unwrap().get(name).cloned()
    }

    fn fail_version(&self, version: &str) {
        self.failing_versions.lock().unwrap().push(version.to_string());
    }
}

#[async_trait::async_trait]
impl Provider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn status(&self, runtime_name: &str) -> ProviderStatus {
        match self.units.lock().unwrap().get(runtime_name) {
            Some(options) => ProviderStatus {
                running: true,
                server_type: Some(options.server_type),
                version: Some(options.version.clone()),
                ports: Some(PortMap {
                    server: 25565,
                    rcon: None,
                }),
                started_at: Some("2025-01-01T00:00:00Z".to_string()),
                level: options.level.clone(),
            },
            None => ProviderStatus::stopped(),
        }
    }

    async fn start(&self, options: StartOptions) -> craftsman::Result<StartResult> {
        self.record(format!("start {}", options.runtime_name));
        if self
            .failing_versions
            .lock()
            .unwrap()
            .contains(&options.version)
        {
            return Err(AppError::backend("image not available"));
        }
        self.units
            .lock()
            .unwrap()
            .insert(options.runtime_name.clone(), options);
        Ok(StartResult {
            runtime_id: Some("fake".to_string()),
            ports: PortMap {
                server: 25565,
                rcon: None,
            },
            rcon: None,
            started_at: "2025-01-01T00:00:00Z".to_string(),
        })
    }

    async fn stop(&self, runtime_name: &str, force_kill: bool) -> StopOutcome {
        self.record(format!("stop {runtime_name} {force_kill}"));
        self.units.lock().unwrap().remove(runtime_name);
        StopOutcome::Stopped
    }

    async fn logs(&self, runtime_name: &str, tail: usize) -> Vec<String> {
        vec![format!("{runtime_name} tail={tail}")]
    }

    async fn rcon(&self, _runtime_name: &str, command: &str) -> RconResult {
        self.record(format!("rcon {command}"));
        RconResult::failure("no rcon channel")
    }
}

struct Harness {
    dir: tempfile::TempDir,
    fake: Arc<FakeProvider>,
    sup: Supervisor,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeProvider::default());
        let provider: Arc<dyn Provider> = Arc::clone(&fake) as Arc<dyn Provider>;
        let settings = Settings {
            backup: BackupSettings { settle_millis: 0 },
            ..Settings::default()
        };
        let sup = Supervisor::new(
            PakStore::new(DataLayout::new(dir.path().join("root"))),
            provider,
            ExtensionCache::new(dir.path().join("cache")),
            settings,
        );
        Self { dir, fake, sup }
    }

    fn create(&self, id: &str, server_type: ServerType) {
        self.sup
            .store()
            .create(CreatePak {
                id: id.to_string(),
                server_type,
                version: "1.21.8".to_string(),
                name: None,
            })
            .unwrap();
    }

    fn data(&self, id: &str) -> PathBuf {
        self.sup.store().layout().pak_data_dir(id)
    }

    fn cache_artifact(&self, ext: &Extension, bytes: &[u8]) {
        self.sup.extension_cache().store_artifact(ext, bytes).unwrap();
    }
}

fn read(path: impl AsRef<Path>) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn creating_twice_conflicts_and_keeps_first_record() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    let before = h.sup.store().read_metadata("alpha").unwrap();

    let err = h
        .sup
        .store()
        .create(CreatePak {
            id: "alpha".to_string(),
            server_type: ServerType::Fabric,
            version: "1.20.1".to_string(),
            name: Some("other".to_string()),
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PakExists);
    assert_eq!(err.category(), ErrorCategory::Conflict);
    assert_eq!(h.sup.store().read_metadata("alpha").unwrap(), before);
}

#[tokio::test]
async fn start_status_stop_cycle() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);

    h.sup.start("alpha", StartOverrides::default()).await.unwrap();
    let status = h.sup.status("alpha").await.unwrap();
    assert!(status.running);
    assert_eq!(status.server_type, Some(ServerType::Paper));
    assert_eq!(status.version.as_deref(), Some("1.21.8"));
    assert_eq!(status.level.as_deref(), Some("world"));

    let options = h.fake.last_options("mc-alpha").unwrap();
    assert_eq!(options.mount_data_dir, h.data("alpha"));
    assert_eq!(options.memory, "4G");

    let outcome = h.sup.stop("alpha", false).await.unwrap();
    assert_eq!(outcome, StopOutcome::Stopped);
    let status = h.sup.status("alpha").await.unwrap();
    assert!(!status.running);
    assert_eq!(status.started_at, None);
    // The rest of the record survives for the next start.
    assert_eq!(status.version.as_deref(), Some("1.21.8"));

    let record = read_runtime(h.sup.store().layout(), "alpha");
    assert_eq!(record.runtime_name.as_deref(), Some("mc-alpha"));
    assert_eq!(record.slot.as_deref(), Some("world"));
}

#[tokio::test]
async fn starting_a_running_instance_is_rejected_without_side_effects() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    h.sup.start("alpha", StartOverrides::default()).await.unwrap();

    let err = h
        .sup
        .start("alpha", StartOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyRunning);
    assert_eq!(h.fake.starts(), 1);
}

#[tokio::test]
async fn stop_asks_the_provider_even_when_never_started() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    assert_eq!(
        h.sup.stop("alpha", true).await.unwrap(),
        StopOutcome::Stopped
    );
    assert_eq!(h.fake.calls(), ["stop mc-alpha true"]);
}

#[tokio::test]
async fn activated_slot_is_the_level_on_next_start() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    fs::write(h.data("alpha").join("world/level.dat"), "lvl").unwrap();

    h.sup.store().save_slot_from_active("alpha", "snap1").unwrap();
    let meta = h.sup.store().activate_slot("alpha", "snap1").unwrap();
    assert_eq!(meta.active_slot, "snap1");

    h.sup.start("alpha", StartOverrides::default()).await.unwrap();
    let options = h.fake.last_options("mc-alpha").unwrap();
    assert_eq!(options.level.as_deref(), Some("snap1"));
}

#[tokio::test]
async fn explicit_missing_slot_blocks_start() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    let overrides = StartOverrides {
        slot: Some("ghost".to_string()),
        ..StartOverrides::default()
    };
    let err = h.sup.start("alpha", overrides).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SlotNotFound);
    assert_eq!(h.fake.starts(), 0);
}

#[tokio::test]
async fn dimension_dir_is_not_a_launchable_slot() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    fs::create_dir_all(h.data("alpha").join("world_nether")).unwrap();
    let overrides = StartOverrides {
        slot: Some("world_nether".to_string()),
        ..StartOverrides::default()
    };
    let err = h.sup.start("alpha", overrides).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(h.fake.starts(), 0);
}

#[tokio::test]
async fn backup_without_level_data_fails_and_writes_nothing() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    fs::remove_dir_all(h.data("alpha").join("world")).unwrap();

    let err = h.sup.backup("alpha", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoLevelData);
    assert_eq!(err.category(), ErrorCategory::DataIntegrity);

    let backups = h.sup.store().layout().pak_backups_dir("alpha");
    let files: Vec<_> = fs::read_dir(&backups)
        .map(|rd| rd.map(|e| e.unwrap().path()).collect())
        .unwrap_or_default();
    assert!(files.is_empty(), "unexpected files: {files:?}");
    // Auto-save is turned back on even though archiving failed.
    assert_eq!(h.fake.calls().last().map(String::as_str), Some("rcon save-on"));
}

#[tokio::test]
async fn missing_extension_blocks_start() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    let ext = Extension::new("modrinth", "p1", "v1", "x.jar");
    h.sup.store().add_extension("alpha", ext.clone()).unwrap();

    let err = h
        .sup
        .start("alpha", StartOverrides::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExtensionMissing);
    assert_eq!(err.category(), ErrorCategory::DependencyMissing);
    let expected = h.sup.extension_cache().artifact_path(&ext);
    assert_eq!(err.detail("expected"), Some(expected.display().to_string().as_str()));
    assert!(expected.ends_with("modrinth/p1/v1/x.jar"));
    assert_eq!(h.fake.starts(), 0);
}

#[tokio::test]
async fn extension_sync_is_idempotent_and_cleans_up() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    let a = Extension::new("modrinth", "p1", "v1", "a.jar");
    let b = Extension::new("hangar", "p2", "v7", "b.jar");
    h.cache_artifact(&a, b"A");
    h.cache_artifact(&b, b"B");
    h.sup.store().add_extension("alpha", a.clone()).unwrap();
    h.sup.store().add_extension("alpha", b).unwrap();

    let first = h.sup.apply_extensions("alpha", ServerType::Paper).unwrap();
    let manifest = read(h.sup.store().layout().ext_manifest_path("alpha"));
    let second = h.sup.apply_extensions("alpha", ServerType::Paper).unwrap();
    assert_eq!(first, ["plugins/a.jar", "plugins/b.jar"]);
    assert_eq!(first, second);
    assert_eq!(read(h.sup.store().layout().ext_manifest_path("alpha")), manifest);

    h.sup.store().remove_extension("alpha", "hangar", "p2").unwrap();
    h.sup.apply_extensions("alpha", ServerType::Paper).unwrap();
    let plugins = h.data("alpha").join("plugins");
    assert_eq!(read(plugins.join("a.jar")), "A");
    assert!(!plugins.join("b.jar").exists());

    // Moving to a mod loader relocates the synced files.
    h.sup.apply_extensions("alpha", ServerType::Fabric).unwrap();
    assert!(!plugins.join("a.jar").exists());
    assert!(h.data("alpha").join("mods/a.jar").is_file());
}

#[tokio::test]
async fn failed_sync_leaves_previous_files_in_place() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    let a = Extension::new("modrinth", "p1", "v1", "a.jar");
    h.cache_artifact(&a, b"A");
    h.sup.store().add_extension("alpha", a).unwrap();
    h.sup.apply_extensions("alpha", ServerType::Paper).unwrap();

    h.sup
        .store()
        .add_extension("alpha", Extension::new("modrinth", "p9", "v1", "gone.jar"))
        .unwrap();
    let err = h
        .sup
        .apply_extensions("alpha", ServerType::Paper)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExtensionMissing);
    assert!(h.data("alpha").join("plugins/a.jar").is_file());
}

#[tokio::test]
async fn partially_copied_extensions_are_cleaned_up_by_the_next_sync() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    let a = Extension::new("modrinth", "p1", "v1", "a.jar");
    let b = Extension::new("modrinth", "p2", "v1", "b.jar");
    h.cache_artifact(&a, b"A");
    h.cache_artifact(&b, b"B");
    h.sup.store().add_extension("alpha", a).unwrap();
    h.sup.store().add_extension("alpha", b).unwrap();

    // A directory in the way makes the second copy fail.
    let plugins = h.data("alpha").join("plugins");
    fs::create_dir_all(plugins.join("b.jar")).unwrap();
    let err = h
        .sup
        .apply_extensions("alpha", ServerType::Paper)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(plugins.join("a.jar").is_file());
    let manifest = read(h.sup.store().layout().ext_manifest_path("alpha"));
    assert!(manifest.contains("plugins/a.jar"));
    assert!(!manifest.contains("plugins/b.jar"));

    fs::remove_dir(plugins.join("b.jar")).unwrap();
    h.sup.store().remove_extension("alpha", "modrinth", "p1").unwrap();
    let applied = h.sup.apply_extensions("alpha", ServerType::Paper).unwrap();
    assert_eq!(applied, ["plugins/b.jar"]);
    assert!(!plugins.join("a.jar").exists());
}

#[tokio::test]
async fn backup_then_restore_round_trips_world_and_keeps_current() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    let data = h.data("alpha");
    fs::create_dir_all(data.join("world/region")).unwrap();
    fs::write(data.join("world/level.dat"), "before").unwrap();
    fs::write(data.join("world/region/r.0.0.mca"), "chunks").unwrap();
    fs::create_dir_all(data.join("world_nether")).unwrap();
    fs::write(data.join("world_nether/n.dat"), "nether").unwrap();

    let report = h.sup.backup("alpha", Some("pre-change")).await.unwrap();
    assert!(report.file.ends_with("backups/pre-change.tgz"));
    assert_eq!(report.levels, ["world", "world_nether"]);
    assert!(report.size > 0);
    assert_eq!(
        h.fake.calls(),
        ["rcon save-off", "rcon save-all flush", "rcon save-on"]
    );

    fs::write(data.join("world/level.dat"), "after").unwrap();
    fs::write(data.join("world/extra.dat"), "new").unwrap();

    let restored = h.sup.restore("alpha", "pre-change.tgz", true).await.unwrap();
    assert_eq!(restored.slot, "world");
    assert_eq!(restored.restored, ["world", "world_nether"]);
    assert_eq!(read(data.join("world/level.dat")), "before");
    assert_eq!(read(data.join("world/region/r.0.0.mca")), "chunks");
    assert_eq!(read(data.join("world_nether/n.dat")), "nether");
    assert!(!data.join("world/extra.dat").exists());
    assert!(!data.join("backup.toml").exists());

    let holding = restored.holding_dir.unwrap();
    assert!(holding.starts_with(data.join("restore-backup")));
    assert_eq!(read(holding.join("world/level.dat")), "after");
    assert_eq!(read(holding.join("world/extra.dat")), "new");
}

#[tokio::test]
async fn restore_without_keep_deletes_current_level() {
    let h = Harness::new();
    h.create("alpha", ServerType::Fabric);
    let data = h.data("alpha");
    fs::write(data.join("world/level.dat"), "before").unwrap();
    h.sup.backup("alpha", Some("b1")).await.unwrap();
    fs::write(data.join("world/junk"), "x").unwrap();

    let report = h.sup.restore("alpha", "b1.tgz", false).await.unwrap();
    assert_eq!(report.holding_dir, None);
    assert!(!data.join("world/junk").exists());
    assert!(!data.join("restore-backup").exists());
    assert_eq!(read(data.join("world/level.dat")), "before");
}

#[tokio::test]
async fn backup_names_are_never_reused() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    h.sup.backup("alpha", Some("daily")).await.unwrap();
    let err = h.sup.backup("alpha", Some("daily")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackupExists);

    let err = h.sup.backup("alpha", Some("../escape")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn restore_only_reads_from_the_backups_directory() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);

    let outside = h.dir.path().join("outside.tgz");
    fs::write(&outside, b"not really").unwrap();
    let err = h
        .sup
        .restore("alpha", &outside.display().to_string(), true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackupNotFound);

    let err = h.sup.restore("alpha", "notes.txt", true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn backups_are_listed_newest_first_with_metadata() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    assert!(h.sup.list_backups("alpha").unwrap().is_empty());

    h.sup.backup("alpha", Some("one")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    h.sup.backup("alpha", Some("two")).await.unwrap();

    let list = h.sup.list_backups("alpha").unwrap();
    assert_eq!(list.len(), 2);
    assert!(list[0].file.ends_with("two.tgz"));
    let meta = list[0].metadata.as_ref().unwrap();
    assert_eq!(meta.pak_id, "alpha");
    assert_eq!(meta.slot, "world");
    assert_eq!(meta.server_type, ServerType::Paper);
}

#[tokio::test]
async fn failed_upgrade_rolls_back_version_and_world() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    let data = h.data("alpha");
    fs::write(data.join("world/level.dat"), "v1 world").unwrap();
    h.fake.fail_version("9.9.9");

    let err = h.sup.upgrade("alpha", "9.9.9").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backend);

    let meta = h.sup.store().read_metadata("alpha").unwrap();
    assert_eq!(meta.engine.version, "1.21.8");
    assert_eq!(read(data.join("world/level.dat")), "v1 world");
    assert_eq!(h.sup.list_backups("alpha").unwrap().len(), 1);
}

#[tokio::test]
async fn upgrade_restarts_on_the_new_version() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    assert!(h.sup.upgrade("alpha", "1.21.8").await.unwrap().is_none());

    let report = h.sup.upgrade("alpha", "1.21.9").await.unwrap().unwrap();
    assert_eq!(report.previous.version, "1.21.8");
    assert_eq!(report.current.version, "1.21.9");
    assert_eq!(
        h.fake.last_options("mc-alpha").unwrap().version,
        "1.21.9"
    );
}

#[tokio::test]
async fn migrate_requires_matching_source_type() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);

    let err = h
        .sup
        .migrate("alpha", ServerType::Forge, ServerType::Fabric)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let report = h
        .sup
        .migrate("alpha", ServerType::Paper, ServerType::Fabric)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.current.server_type, ServerType::Fabric);
    let options = h.fake.last_options("mc-alpha").unwrap();
    assert_eq!(options.server_type, ServerType::Fabric);
}

#[tokio::test]
async fn statuses_skip_broken_instance_dirs() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    h.create("beta", ServerType::Fabric);
    fs::create_dir_all(h.sup.store().layout().pak_dir("broken")).unwrap();

    let ids: Vec<String> = h
        .sup
        .statuses()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, ["alpha", "beta"]);
}

#[tokio::test]
async fn status_of_unknown_instance_is_not_found() {
    let h = Harness::new();
    let err = h.sup.status("ghost").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PakNotFound);
    assert_eq!(err.category(), ErrorCategory::NotFound);
}

#[tokio::test]
async fn logs_pass_through_and_following_needs_capability() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    assert_eq!(h.sup.logs("alpha", 5).await.unwrap(), ["mc-alpha tail=5"]);
    let err = h.sup.follow_logs("alpha", 5).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn insert_stops_and_switches_slot() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    h.sup.store().save_slot_from_active("alpha", "snap1").unwrap();
    h.sup.start("alpha", StartOverrides::default()).await.unwrap();

    let spec = h.sup.insert("alpha", Some("snap1")).await.unwrap();
    assert_eq!(spec.slot, "snap1");
    assert!(!h.sup.status("alpha").await.unwrap().running);

    let err = h.sup.insert("alpha", Some("ghost")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SlotNotFound);
    assert_eq!(
        h.sup.store().read_metadata("alpha").unwrap().active_slot,
        "snap1"
    );
}

#[tokio::test]
async fn remove_stops_then_deletes_everything() {
    let h = Harness::new();
    h.create("alpha", ServerType::Paper);
    h.sup.start("alpha", StartOverrides::default()).await.unwrap();

    h.sup.remove("alpha").await.unwrap();
    assert!(!h.sup.store().layout().pak_dir("alpha").exists());
    assert!(h.fake.calls().contains(&"stop mc-alpha false".to_string()));

    let err = h.sup.remove("alpha").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PakNotFound);
}
