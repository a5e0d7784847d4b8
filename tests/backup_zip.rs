#[path = "../src/backup.rs"]
mod backup;
mod common;

use common::{seed, str_at, temp_dir, Sidecar};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("merittrac-backup-src");
    let workspace2 = temp_dir("merittrac-backup-dst");
    let out_dir = temp_dir("merittrac-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("merittrac.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.merittrac.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT));
    assert!(manifest.contains(&export.db_sha256));

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.db_sha256, export.db_sha256);
    let restored = std::fs::read(workspace2.join("merittrac.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_bundle_is_rejected_and_leaves_workspace_alone() {
    let out_dir = temp_dir("merittrac-backup-tamper");
    let workspace = temp_dir("merittrac-backup-tamper-dst");
    std::fs::write(workspace.join("merittrac.sqlite3"), b"current").expect("write current db");

    let bundle_path = out_dir.join("tampered.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(
            json!({ "format": backup::BUNDLE_FORMAT, "dbSha256": "0".repeat(64) })
                .to_string()
                .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/merittrac.sqlite3", opts).expect("db entry");
        zip.write_all(b"swapped").expect("write db");
        zip.finish().expect("finish zip");
    }

    let e = backup::import_workspace_bundle(&bundle_path, &workspace).expect_err("checksum");
    assert!(format!("{e:#}").contains("checksum mismatch"));
    let current = std::fs::read(workspace.join("merittrac.sqlite3")).expect("read current db");
    assert_eq!(current, b"current");

    let not_zip = out_dir.join("plain.sqlite3");
    std::fs::write(&not_zip, b"raw").expect("write raw file");
    assert!(backup::import_workspace_bundle(&not_zip, &workspace).is_err());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn import_restores_data_and_keeps_a_valid_session() {
    let mut sc = Sidecar::spawn();
    let s = seed(&mut sc, "merittrac-backup-ipc");
    let out_dir = temp_dir("merittrac-backup-ipc-out");
    let bundle = out_dir.join("snapshot.zip");

    let exported = sc.request_ok(
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"].as_str(), Some(backup::BUNDLE_FORMAT));

    let art = sc.request_ok("subjects.create", json!({ "name": "Art", "code": "ART1" }));
    let art_id = str_at(&art, "subjectId").to_string();

    let imported = sc.request_ok(
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["sessionKept"].as_bool(), Some(true));
    assert_eq!(imported["dbSha256"], exported["dbSha256"]);

    let subjects = sc.request_ok("subjects.list", json!({}));
    let ids: Vec<&str> = subjects["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .filter_map(|v| v["id"].as_str())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&art_id.as_str()));

    sc.sign_in(&s.teacher);
    assert_eq!(
        sc.request_err(
            "backup.exportWorkspaceBundle",
            json!({ "outPath": out_dir.join("nope.zip").to_string_lossy() })
        ),
        "forbidden"
    );

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(s.workspace);
}
