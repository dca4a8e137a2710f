use std::{fs, path::PathBuf};

use simfat_ds::{CLUSTER_SIZE, PARTITION_SIZE};
use simfat_ds_file::DataStorageServer;
use simfat_fs::FileSystem;
use simfat_fs_fat16::{FileSystemServer, BOOT_FILL};

fn temp_partition(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("simfat-fat16-{}-{}.part", name, std::process::id()))
}

#[test]
fn partition_survives_reopen() {
    let path = temp_partition("reopen");
    {
        let mut server = FileSystemServer::new(DataStorageServer::open(&path).unwrap());
        server.format().unwrap();
        server.load().unwrap();
        server.mkdir("/docs").unwrap();
        server.create("/docs/hello.txt").unwrap();
        server.write("/docs/hello.txt", b"Hello, world!").unwrap();
    }
    assert_eq!(fs::metadata(&path).unwrap().len(), PARTITION_SIZE);

    // A fresh server over the same file only needs to load, not format.
    let mut server = FileSystemServer::new(DataStorageServer::open(&path).unwrap());
    server.load().unwrap();
    assert_eq!(server.read("/docs/hello.txt").unwrap(), b"Hello, world!");
    assert_eq!(server.list("/docs").unwrap().len(), 1);

    fs::remove_file(&path).unwrap();
}

#[test]
fn on_disk_layout_is_byte_exact() {
    let path = temp_partition("layout");
    {
        let mut server = FileSystemServer::new(DataStorageServer::open(&path).unwrap());
        server.format().unwrap();
    }

    let image = fs::read(&path).unwrap();
    assert_eq!(image.len(), PARTITION_SIZE as usize);

    // Boot block is filled with the marker byte.
    assert!(image[..CLUSTER_SIZE].iter().all(|&byte| byte == BOOT_FILL));

    // FAT entries are 16-bit little-endian: boot, eight reserved, the root
    // end-of-chain, then a free data area.
    let fat = &image[CLUSTER_SIZE..];
    assert_eq!(fat[..2], [0xFD, 0xFF]);
    for entry in 1..=8 {
        assert_eq!(fat[entry * 2..entry * 2 + 2], [0xFE, 0xFF]);
    }
    assert_eq!(fat[9 * 2..9 * 2 + 2], [0xFF, 0xFF]);
    assert_eq!(fat[10 * 2..10 * 2 + 2], [0x00, 0x00]);

    // Root directory cluster starts out with 32 empty slots.
    let root = &image[9 * CLUSTER_SIZE..10 * CLUSTER_SIZE];
    assert!(root.iter().all(|&byte| byte == 0));

    fs::remove_file(&path).unwrap();
}
