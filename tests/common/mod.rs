//! 集成测试共用的文件系统辅助函数

#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// 描述文件内容
pub fn descriptor(name: &str, version: &str, extra: &str) -> String {
    format!("name: {name}\ndescription: {name} module\nauthor: Chips Team\nversion: \"{version}\"\n{extra}")
}

/// 在根目录下创建一个模块目录
pub fn write_module(root: &Path, id: &str, version: &str, extra: &str) -> PathBuf {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("module.yaml"), descriptor(id, version, extra)).unwrap();
    dir
}

/// 写入 zip 安装包，以 `/` 结尾的条目为目录
pub fn build_archive(path: &Path, entries: &[(&str, &str)]) -> PathBuf {
    let file = File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
    }
    zip.finish().unwrap();
    path.to_path_buf()
}

/// 包含单个顶层目录的模块安装包
pub fn module_archive(dir: &Path, id: &str, version: &str, payload: &str) -> PathBuf {
    let yaml = descriptor(id, version, "");
    let top = format!("{id}/");
    let descriptor_path = format!("{id}/module.yaml");
    let payload_path = format!("{id}/payload.txt");
    build_archive(
        &dir.join(format!("{id}-{version}.zip")),
        &[
            (top.as_str(), ""),
            (descriptor_path.as_str(), yaml.as_str()),
            (payload_path.as_str(), payload),
        ],
    )
}

/// 根目录下的子目录名（排序）
pub fn child_dirs(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
