use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use pollination_study_browser::error::StudyError;
use pollination_study_browser::store::{DownloadOrigin, Store};

fn origin(key: &str) -> DownloadOrigin<'_> {
    DownloadOrigin {
        owner: "acme",
        project: "demo",
        study: "s-1",
        key,
    }
}

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("downloads")).unwrap();
    (temp, Store::new(root))
}

#[test]
fn empty_download_is_rejected() {
    let (_temp, store) = temp_store();
    assert_matches!(
        store.save_download(&origin("out/a.txt"), "a.txt", &[], false),
        Err(StudyError::NothingToDownload)
    );
}

#[test]
fn saving_twice_overwrites() {
    let (_temp, store) = temp_store();
    store
        .save_download(&origin("out/a.txt"), "a.txt", b"first", false)
        .unwrap();
    let saved = store
        .save_download(&origin("out/a.txt"), "a.txt", b"second", false)
        .unwrap();

    assert_eq!(std::fs::read(&saved.path).unwrap(), b"second");
    assert!(saved.path.starts_with(store.root().as_str()));
    assert_eq!(store.list_metadata().unwrap().len(), 1);
}

#[test]
fn zip_download_is_extracted_on_request() {
    let (_temp, store) = temp_store();
    let mut archive = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut archive));
        writer
            .start_file("grids/room.res", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"3.0\n").unwrap();
        writer.finish().unwrap();
    }

    let saved = store
        .save_download(&origin("out/results.zip"), "results.zip", &archive, true)
        .unwrap();

    let extracted = saved.extracted_to.expect("zip extracted");
    assert!(extracted.ends_with("acme/demo/s-1/results"));
    let content = std::fs::read_to_string(format!("{extracted}/grids/room.res")).unwrap();
    assert_eq!(content, "3.0\n");
}

#[test]
fn non_zip_is_never_extracted() {
    let (_temp, store) = temp_store();
    let saved = store
        .save_download(&origin("out/a.vtkjs"), "a.vtkjs", b"\x00\x01", true)
        .unwrap();
    assert_eq!(saved.extracted_to, None);
}

#[test]
fn metadata_lists_every_download() {
    let (_temp, store) = temp_store();
    assert!(store.list_metadata().unwrap().is_empty());

    store
        .save_download(&origin("out/b.txt"), "b.txt", b"b", false)
        .unwrap();
    store
        .save_download(&origin("out/a.txt"), "a.txt", b"a", false)
        .unwrap();

    let keys = store
        .list_metadata()
        .unwrap()
        .into_iter()
        .map(|metadata| metadata.key)
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["out/a.txt", "out/b.txt"]);
}
