//! Managing, synchronizing, switching and reverting loadouts end to end.

mod common;

use common::{ORIGINAL_CONTENT, ORIGINAL_FILE, TestEnv, tree_of};
use loadsync_lib::paths::{LocationId, RelativePath};
use loadsync_lib::store::BackupStore;
use loadsync_lib::sync::{InstallationState, OVERRIDES_MOD_NAME};
use loadsync_lib::util::hash::hash_bytes;

const NEW_FILE: &str = "bin/newFileInGameFolderA.txt";

#[tokio::test]
async fn new_file_follows_the_loadout_that_picked_it_up() {
  let env = TestEnv::new();
  let id = env.manage().await;
  let a = env.sync.create_loadout(id, "Loadout A").await.unwrap();

  let outcome = env.sync.synchronize(a.id).await.unwrap();
  assert!(outcome.plan.is_noop());

  env.write(NEW_FILE, "created outside the manager");
  env.sync.rescan_files(id).await.unwrap();
  let outcome = env.sync.synchronize(a.id).await.unwrap();
  let a_now = outcome.loadout.unwrap();
  let overrides = a_now.overrides_mod().expect("overrides mod created");
  assert_eq!(overrides.name, OVERRIDES_MOD_NAME);
  assert_eq!(overrides.files.len(), 1);
  assert_eq!(overrides.files[0].to().to_string(), format!("{{Game}}/{}", NEW_FILE));

  env.sync.deactivate_current_loadout(id).await.unwrap();
  assert_eq!(env.sync.state(id), InstallationState::Managed);
  assert_eq!(env.tree(), tree_of(&[(ORIGINAL_FILE, ORIGINAL_CONTENT)]));

  let b = env.sync.create_loadout(id, "Loadout B").await.unwrap();
  assert_eq!(b.short_name, "B");
  env.sync.synchronize(b.id).await.unwrap();
  assert!(matches!(env.sync.state(id), InstallationState::Active(p) if p.loadout == b.id));
  let b_disk = env.sync.db().latest_disk_state(id).unwrap();
  assert_eq!(b_disk.len(), 1);
  assert_eq!(env.read(NEW_FILE), None);

  env.sync.synchronize(a.id).await.unwrap();
  assert!(matches!(env.sync.state(id), InstallationState::Active(p) if p.loadout == a.id));
  assert_eq!(
    env.tree(),
    tree_of(&[(ORIGINAL_FILE, ORIGINAL_CONTENT), (NEW_FILE, "created outside the manager")])
  );
}

#[tokio::test]
async fn deactivate_restores_overwritten_vendor_file() {
  let env = TestEnv::new();
  let download = env.download("patch", &[("originalGameFile.txt", "patched")]);
  let id = env.manage().await;
  let a = env.sync.create_loadout(id, "Loadout A").await.unwrap();

  env
    .sync
    .install_mod(a.id, "Patch", &download, LocationId::game(), Some(RelativePath::new("bin").unwrap()))
    .await
    .unwrap();
  env.sync.synchronize(a.id).await.unwrap();
  assert_eq!(env.read(ORIGINAL_FILE).as_deref(), Some("patched"));

  env.sync.deactivate_current_loadout(id).await.unwrap();
  assert_eq!(env.tree(), tree_of(&[(ORIGINAL_FILE, ORIGINAL_CONTENT)]));
}

#[tokio::test]
async fn repeated_synchronize_and_activate_commit_nothing() {
  let env = TestEnv::new();
  let download = env.download("modA", &[("textureA.txt", "texture")]);
  let id = env.manage().await;
  let a = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  env
    .sync
    .install_mod(a.id, "ModA", &download, LocationId::game(), Some(RelativePath::new("bin/mods/modA").unwrap()))
    .await
    .unwrap();
  env.write("bin/user.cfg", "fov=90");

  let first = env.sync.synchronize(a.id).await.unwrap();
  assert!(first.tx.is_some());
  assert_eq!(first.plan.summary().copies, 1);
  assert_eq!(first.plan.summary().loadout_edits, 1);
  let before = env.tree();
  let last_tx = env.sync.db().last_tx();

  let second = env.sync.synchronize(a.id).await.unwrap();
  assert!(second.plan.is_noop());
  assert_eq!(second.tx, None);

  let third = env.sync.activate_loadout(a.id).await.unwrap();
  assert!(third.plan.is_noop());
  assert_eq!(third.tx, None);

  assert_eq!(env.sync.db().last_tx(), last_tx);
  assert_eq!(env.tree(), before);
}

#[tokio::test]
async fn activate_overwrites_external_edits_after_backing_them_up() {
  let env = TestEnv::new();
  let download = env.download("modA", &[("textureA.txt", "texture")]);
  let id = env.manage().await;
  let a = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  env
    .sync
    .install_mod(a.id, "ModA", &download, LocationId::game(), Some(RelativePath::new("bin/mods/modA").unwrap()))
    .await
    .unwrap();
  env.sync.synchronize(a.id).await.unwrap();

  env.write("bin/mods/modA/textureA.txt", "hand tuned");
  let outcome = env.sync.activate_loadout(a.id).await.unwrap();

  assert_eq!(outcome.plan.summary().backups, 1);
  assert!(env.sync.store().have_file(&hash_bytes(b"hand tuned")));
  assert_eq!(env.read("bin/mods/modA/textureA.txt").as_deref(), Some("texture"));
  assert!(outcome.loadout.unwrap().overrides_mod().is_none());
}

#[tokio::test]
async fn deleting_the_active_loadout_reverts_first() {
  let env = TestEnv::new();
  let download = env.download("modA", &[("textureA.txt", "texture")]);
  let id = env.manage().await;
  let a = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  env
    .sync
    .install_mod(a.id, "ModA", &download, LocationId::game(), Some(RelativePath::new("bin/mods/modA").unwrap()))
    .await
    .unwrap();
  env.sync.synchronize(a.id).await.unwrap();

  env.sync.delete_loadout(a.id).await.unwrap();
  assert_eq!(env.sync.state(id), InstallationState::Managed);
  assert!(env.sync.db().loadout(a.id).is_err());
  assert_eq!(env.tree(), tree_of(&[(ORIGINAL_FILE, ORIGINAL_CONTENT)]));
}

#[tokio::test]
async fn copied_loadout_is_independent() {
  let env = TestEnv::new();
  let download = env.download("modA", &[("textureA.txt", "texture")]);
  let id = env.manage().await;
  let a = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  let (_, mod_id) = env
    .sync
    .install_mod(a.id, "ModA", &download, LocationId::game(), None)
    .await
    .unwrap();

  let copy = env.sync.copy_loadout(a.id).await.unwrap();
  assert_ne!(copy.id, a.id);
  assert_eq!(copy.short_name, "B");
  assert_eq!(copy.name, "Loadout A Copy");

  env.sync.set_mod_enabled(copy.id, mod_id, false).await.unwrap();
  let original = env.sync.db().loadout(a.id).unwrap();
  assert!(original.mod_by_id(mod_id).unwrap().enabled);
}

#[tokio::test]
async fn unmanage_reverts_and_forgets_the_installation() {
  let env = TestEnv::new();
  let download = env.download("modA", &[("textureA.txt", "texture")]);
  let id = env.manage().await;
  let a = env.sync.create_loadout(id, "Loadout A").await.unwrap();
  env
    .sync
    .install_mod(a.id, "ModA", &download, LocationId::game(), None)
    .await
    .unwrap();
  env.sync.synchronize(a.id).await.unwrap();
  assert_eq!(env.read("textureA.txt").as_deref(), Some("texture"));

  env.sync.unmanage(id).await.unwrap();
  assert_eq!(env.sync.state(id), InstallationState::Unmanaged);
  assert!(env.sync.db().loadouts_for(id).is_empty());
  assert_eq!(env.tree(), tree_of(&[(ORIGINAL_FILE, ORIGINAL_CONTENT)]));

  // The folder can be managed again afterwards.
  env.manage().await;
}
