//! On-disk database and backup store across process restarts.

mod common;

use common::{ORIGINAL_CONTENT, ORIGINAL_FILE, TestEnv, tree_of};
use loadsync_lib::paths::{LocationId, RelativePath};
use loadsync_lib::store::{BackupStore, FileBackupStore};
use loadsync_lib::sync::InstallationState;
use loadsync_lib::util::hash::hash_bytes;

#[tokio::test]
async fn state_survives_reopening() {
  let env = TestEnv::persistent();
  let download = env.download("ModA", &[("textureA.txt", "texture")]);
  let id = env.manage().await;
  let loadout = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  env
    .sync
    .install_mod(loadout.id, "ModA", &download, LocationId::game(), Some(RelativePath::new("bin/mods").unwrap()))
    .await
    .unwrap();
  env.sync.synchronize(loadout.id).await.unwrap();
  let last_tx = env.sync.db().last_tx();

  let env = env.reopen();
  assert_eq!(env.sync.db().last_tx(), last_tx);
  assert!(matches!(env.sync.state(id), InstallationState::Active(p) if p.loadout == loadout.id));
  assert_eq!(env.sync.db().loadouts_for(id).len(), 1);
  assert!(env.sync.store().have_file(&hash_bytes(b"texture")));

  let outcome = env.sync.synchronize(loadout.id).await.unwrap();
  assert!(outcome.plan.is_noop());
  assert_eq!(outcome.tx, None);
}

#[tokio::test]
async fn revert_restores_vendor_bytes_from_the_file_store() {
  let env = TestEnv::persistent();
  let download = env.download("Patch", &[("originalGameFile.txt", "patched")]);
  let id = env.manage().await;
  let loadout = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  env
    .sync
    .install_mod(loadout.id, "Patch", &download, LocationId::game(), Some(RelativePath::new("bin").unwrap()))
    .await
    .unwrap();
  env.sync.synchronize(loadout.id).await.unwrap();
  assert_eq!(env.read(ORIGINAL_FILE).as_deref(), Some("patched"));

  // The download is gone; only the store can bring the original back.
  std::fs::remove_dir_all(env.temp.path().join("downloads")).unwrap();
  let env = env.reopen();
  env.sync.deactivate_current_loadout(id).await.unwrap();

  assert_eq!(env.tree(), tree_of(&[(ORIGINAL_FILE, ORIGINAL_CONTENT)]));
  let store = FileBackupStore::open(env.data().join("store")).unwrap();
  assert_eq!(store.stats().blobs, 2);
}
