use std::io::{Read, Seek, SeekFrom, Write};

use platter::{
    Disk, FileSystem, FileSystemKind, FsError, GptPartition, GptTable, IsoFileSystem, MemBackend,
    OpenFlags, SectorSize, Table,
};
use platter_common::Guid;
use platter_iso::FormatOptions;

const MIB: u64 = 1024 * 1024;

#[test]
fn partitioned_disk_hosts_an_iso() {
    let backend = MemBackend::new(32 * MIB as usize);
    let mut disk = Disk::new(backend, SectorSize::S512, SectorSize::S512);

    let mut table = GptTable::create(32 * MIB, SectorSize::S512).unwrap();
    // 16 MiB of data space.
    table
        .add_partition(GptPartition::new(Guid::BASIC_DATA, 2048, 34815, "media"))
        .unwrap();
    disk.apply_table(Table::Gpt(table)).unwrap();

    {
        let window = disk.partition_window(0).unwrap();
        let mut fs = IsoFileSystem::create(window, "PAYLOAD").unwrap();
        fs.mkdir("/docs").unwrap();
        let mut file = fs
            .open_file("/docs/hello.txt", OpenFlags::WRONLY | OpenFlags::CREATE)
            .unwrap();
        file.write_all(b"hello from a partition\n").unwrap();
        drop(file);
        fs.finalize(FormatOptions::default()).unwrap();
        assert!(fs.is_frozen());
    }

    assert_eq!(
        disk.probe_partition(0).unwrap(),
        Some(FileSystemKind::Iso9660)
    );

    let window = disk.partition_window(0).unwrap();
    let mut fs = IsoFileSystem::open(window).unwrap();
    assert_eq!(fs.kind(), FileSystemKind::Iso9660);
    assert_eq!(fs.label().unwrap(), "PAYLOAD");

    let root = fs.read_dir("/").unwrap();
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].name, "DOCS");
    assert!(root[0].is_dir);

    let mut file = fs.open_file("/DOCS/HELLO.TXT", OpenFlags::RDONLY).unwrap();
    let mut contents = String::new();
    file.read_to_string(&mut contents).unwrap();
    assert_eq!(contents, "hello from a partition\n");

    let stat = file.stat().unwrap();
    assert_eq!(stat.size, 23);
    assert!(!stat.is_dir);
}

#[test]
fn workspace_mutations_and_flags() {
    let backend = MemBackend::new(8 * MIB as usize);
    let mut fs = IsoFileSystem::create(backend, "SCRATCH").unwrap();

    fs.mkdir("/a/b").unwrap();
    let mut file = fs
        .open_file("/a/b/data.bin", OpenFlags::RDWR | OpenFlags::CREATE)
        .unwrap();
    file.write_all(&[1, 2, 3, 4]).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf).unwrap();
    assert_eq!(buf, [1, 2, 3, 4]);
    assert_eq!(file.write_at(&[9], 0).unwrap(), 1);
    assert_eq!(file.read_at(&mut buf[..1], 0).unwrap(), 1);
    assert_eq!(buf[0], 9);
    drop(file);

    // EXCL refuses to recreate.
    assert!(matches!(
        fs.open_file(
            "/a/b/data.bin",
            OpenFlags::WRONLY | OpenFlags::CREATE | OpenFlags::EXCL
        ),
        Err(FsError::AlreadyExists(_))
    ));

    fs.rename("/a/b/data.bin", "/a/b/renamed.bin").unwrap();
    assert!(matches!(
        fs.open_file("/a/b/data.bin", OpenFlags::RDONLY),
        Err(FsError::NotFound(_))
    ));

    fs.set_label("FINAL").unwrap();
    assert_eq!(fs.label().unwrap(), "FINAL");

    // Rock Ridge metadata calls are sentinel errors on this filesystem.
    assert!(matches!(
        fs.symlink("/target", "/link"),
        Err(FsError::NotSupported("symlink"))
    ));
    assert!(matches!(
        fs.chmod("/a", 0o755),
        Err(FsError::NotSupported("chmod"))
    ));

    fs.remove("/a/b/renamed.bin").unwrap();
    fs.remove("/a/b").unwrap();
    fs.finalize(FormatOptions::default()).unwrap();

    // Frozen: every mutation is refused.
    assert!(matches!(fs.mkdir("/nope"), Err(FsError::ReadOnly)));
    assert!(matches!(
        fs.open_file("/anything", OpenFlags::WRONLY),
        Err(FsError::ReadOnly)
    ));
    assert!(matches!(fs.set_label("X"), Err(FsError::ReadOnly)));

    let entries = fs.read_dir("/").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "A");
}

#[test]
fn frozen_files_refuse_writes() {
    let backend = MemBackend::new(8 * MIB as usize);
    let mut fs = IsoFileSystem::create(backend, "RO").unwrap();
    let mut file = fs
        .open_file("/f.txt", OpenFlags::WRONLY | OpenFlags::CREATE)
        .unwrap();
    file.write_all(b"fixed").unwrap();
    drop(file);
    fs.finalize(FormatOptions::default()).unwrap();

    let mut file = fs.open_file("/F.TXT", OpenFlags::RDONLY).unwrap();
    let mut text = String::new();
    file.read_to_string(&mut text).unwrap();
    assert_eq!(text, "fixed");
    assert!(file.write(b"no").is_err());
    assert!(matches!(file.write_at(b"no", 0), Err(FsError::ReadOnly)));
}

#[test]
fn unpartitioned_probe_sees_the_iso() {
    let backend = MemBackend::new(8 * MIB as usize);
    let mut fs = IsoFileSystem::create(backend, "PLAIN").unwrap();
    fs.open_file("/x", OpenFlags::WRONLY | OpenFlags::CREATE)
        .unwrap();
    fs.finalize(FormatOptions::default()).unwrap();

    let mut disk = Disk::new(fs.into_device(), SectorSize::S512, SectorSize::S512);
    assert_eq!(disk.probe().unwrap(), Some(FileSystemKind::Iso9660));
    assert!(disk.detect_table().unwrap().is_none());
}
