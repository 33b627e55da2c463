//! Game updates applied outside the manager.

mod common;

use common::TestEnv;
use loadsync_lib::loadout::ModFile;
use loadsync_lib::paths::{GamePath, LocationId, RelativePath};
use loadsync_lib::store::BackupStore;
use loadsync_lib::util::hash::hash_bytes;

#[tokio::test]
async fn game_update_changes_version_but_not_loadouts() {
  let env = TestEnv::new();
  env.write("game/Data/image.dds", "image v1");
  env.write("game/Data/image2.dds", "image2 v1");
  let id = env.manage().await;
  let loadout = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  let version_before = env.sync.db().installation(id).unwrap().metadata.game_version;
  assert!(version_before.is_some());
  assert_eq!(loadout.game_version, version_before);

  env.write("game/Data/image.dds", "image v2");
  env.write("game/Data/image2.dds", "image2 v2");
  env.sync.rescan_files(id).await.unwrap();

  let version_after = env.sync.db().installation(id).unwrap().metadata.game_version;
  assert!(version_after.is_some());
  assert_ne!(version_after, version_before);

  let unchanged = env.sync.db().loadout(loadout.id).unwrap();
  assert_eq!(unchanged.revision, loadout.revision);
  assert_eq!(unchanged.mods, loadout.mods);
  assert!(unchanged.overrides_mod().is_none());
}

#[tokio::test]
async fn installing_mods_does_not_change_version() {
  let env = TestEnv::new();
  let download = env.download("ModA", &[("textureA.txt", "texture")]);
  let id = env.manage().await;
  let loadout = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  let version_before = env.sync.db().installation(id).unwrap().metadata.game_version;

  env
    .sync
    .install_mod(loadout.id, "ModA", &download, LocationId::game(), Some(RelativePath::new("bin/mods").unwrap()))
    .await
    .unwrap();
  env.sync.synchronize(loadout.id).await.unwrap();
  env.sync.rescan_files(id).await.unwrap();

  assert_eq!(env.sync.db().installation(id).unwrap().metadata.game_version, version_before);
}

#[tokio::test]
async fn mod_overwriting_a_vendor_file_does_not_change_version() {
  let env = TestEnv::new();
  let download = env.download("Patch", &[("originalGameFile.txt", "patched")]);
  let id = env.manage().await;
  let loadout = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  let version_before = env.sync.db().installation(id).unwrap().metadata.game_version;

  env
    .sync
    .install_mod(loadout.id, "Patch", &download, LocationId::game(), Some(RelativePath::new("bin").unwrap()))
    .await
    .unwrap();
  env.sync.synchronize(loadout.id).await.unwrap();
  env.write("bin/unrelated.txt", "trigger a new disk state");
  env.sync.rescan_files(id).await.unwrap();

  assert_eq!(env.sync.db().installation(id).unwrap().metadata.game_version, version_before);
}

#[tokio::test]
async fn synchronize_after_game_update_keeps_updated_vendor_files() {
  let env = TestEnv::new();
  env.write("game/Data/image.dds", "image v1");
  env.write("game/Data/image2.dds", "image2 v1");
  let id = env.manage().await;
  let a = env.sync.create_loadout(id, "Loadout A").await.unwrap();

  env.write("game/Data/image.dds", "image v2");
  env.write("game/Data/image2.dds", "image2 v2");
  let outcome = env.sync.synchronize(a.id).await.unwrap();
  assert_eq!(outcome.plan.summary().loadout_edits, 0);

  let version = env.sync.db().installation(id).unwrap().metadata.game_version;
  let a_now = outcome.loadout.unwrap();
  assert!(a_now.overrides_mod().is_none());
  assert_eq!(a_now.game_version, version);
  let game_files = a_now.game_files_mod().unwrap();
  let hash_at = |path: &str| {
    game_files
      .files
      .iter()
      .find_map(|f| match f {
        ModFile::Static(f) if f.to == GamePath::game(path).unwrap() => Some(f.hash.clone()),
        _ => None,
      })
      .unwrap()
  };
  assert_eq!(hash_at("game/Data/image.dds"), hash_bytes(b"image v2"));
  assert_eq!(hash_at("game/Data/image2.dds"), hash_bytes(b"image2 v2"));
  assert!(env.sync.store().have_file(&hash_bytes(b"image v2")));

  env.sync.deactivate_current_loadout(id).await.unwrap();
  assert_eq!(env.read("game/Data/image.dds").as_deref(), Some("image v2"));
  assert_eq!(env.read("game/Data/image2.dds").as_deref(), Some("image2 v2"));
}

#[tokio::test]
async fn switching_after_game_update_rebases_the_other_loadout() {
  let env = TestEnv::new();
  env.write("game/Data/image.dds", "image v1");
  let id = env.manage().await;
  let a = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  let b = env.sync.create_loadout(id, "Loadout B").await.unwrap();

  env.write("game/Data/image.dds", "image v2");
  env.sync.synchronize(a.id).await.unwrap();
  let outcome = env.sync.synchronize(b.id).await.unwrap();

  assert_eq!(env.read("game/Data/image.dds").as_deref(), Some("image v2"));
  let b_now = outcome.loadout.unwrap();
  assert!(b_now.overrides_mod().is_none());
  assert_eq!(b_now.game_version, env.sync.db().installation(id).unwrap().metadata.game_version);
  assert!(b_now.game_files_mod().unwrap().files.iter().any(|f| match f {
    ModFile::Static(f) => f.hash == hash_bytes(b"image v2"),
    ModFile::Generated(_) => false,
  }));
}
