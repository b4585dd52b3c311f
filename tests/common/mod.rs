#![allow(dead_code)]

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

pub fn touch(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, contents).expect("write file");
}

/// Lays out the files an Ultralytics TFLite export leaves behind.
pub fn write_saved_model(root: &Path, stem: &str) {
    touch(&root.join("saved_model.pb"), "graph");
    touch(&root.join("fingerprint.pb"), "fp");
    touch(&root.join("metadata.yaml"), "names: {0: person}\n");
    touch(
        &root.join("variables/variables.data-00000-of-00001"),
        "weights",
    );
    touch(&root.join("variables/variables.index"), "index");
    fs::create_dir_all(root.join("assets")).expect("create assets dir");

    for variant in [
        "float16",
        "float32",
        "full_integer_quant",
        "int8",
        "integer_quant",
    ] {
        touch(
            &root.join(format!("{stem}_{variant}.tflite")),
            &format!("tflite {variant}"),
        );
    }
}

/// Relative paths of every file under `root`, sorted.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.expect("walk dir"))
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .expect("strip prefix")
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}
