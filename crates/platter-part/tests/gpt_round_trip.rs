use platter_common::Guid;
use platter_io::{BlockDevice, MemBackend, SectorSize};
use platter_part::{GptPartition, GptTable, PartError, Table, read_table};

const MIB: u64 = 1024 * 1024;

fn image(size: u64) -> MemBackend {
    MemBackend::new(size as usize)
}

#[test]
fn write_then_read_back_equal() {
    let mut dev = image(10 * MIB);
    let mut table = GptTable::create(10 * MIB, SectorSize::S512).unwrap();
    table
        .add_partition(GptPartition::new(
            Guid::EFI_SYSTEM,
            2048,
            3048,
            "EFI System",
        ))
        .unwrap();
    table.write_to(&mut dev).unwrap();

    let read = GptTable::read(&mut dev, SectorSize::S512).unwrap();
    assert_eq!(read, table);
    read.verify(&mut dev).unwrap();

    assert_eq!(read.first_usable_sector(), 34);
    assert_eq!(read.last_usable_sector(), 20446);
    let part = &read.partitions()[0];
    assert_eq!(part.first_lba, 2048);
    assert_eq!(part.last_lba, 3048);
    assert_eq!(part.type_guid, Guid::EFI_SYSTEM);
    assert_eq!(part.name, "EFI System");
    assert_eq!(part.size_bytes(), (3048 - 2048 + 1) * 512);
    assert!(read.partitions()[1..].iter().all(|p| p.is_unused()));
}

#[test]
fn secondary_header_mirrors_primary() {
    let mut dev = image(10 * MIB);
    let table = GptTable::create(10 * MIB, SectorSize::S512).unwrap();
    table.write_to(&mut dev).unwrap();

    let bytes = dev.as_slice();
    let secondary_lba = table.secondary_header_sector();
    let secondary = &bytes[(secondary_lba * 512) as usize..(secondary_lba * 512 + 92) as usize];
    assert_eq!(&secondary[0..8], b"EFI PART");
    // my_lba of the secondary equals alternate_lba of the primary and
    // vice versa.
    let my = u64::from_le_bytes(secondary[24..32].try_into().unwrap());
    let alternate = u64::from_le_bytes(secondary[32..40].try_into().unwrap());
    assert_eq!(my, secondary_lba);
    assert_eq!(alternate, 1);

    let primary = &bytes[512..512 + 92];
    let p_my = u64::from_le_bytes(primary[24..32].try_into().unwrap());
    let p_alt = u64::from_le_bytes(primary[32..40].try_into().unwrap());
    assert_eq!(p_my, 1);
    assert_eq!(p_alt, secondary_lba);
}

#[test]
fn protective_mbr_is_emitted() {
    let mut dev = image(10 * MIB);
    let table = GptTable::create(10 * MIB, SectorSize::S512).unwrap();
    table.write_to(&mut dev).unwrap();

    let bytes = dev.as_slice();
    assert!(bytes[..446].iter().all(|&b| b == 0));
    assert_eq!(bytes[450], 0xEE);
    assert_eq!(u32::from_le_bytes(bytes[454..458].try_into().unwrap()), 1);
    assert_eq!(
        u32::from_le_bytes(bytes[458..462].try_into().unwrap()),
        10 * MIB as u32 / 512 - 1
    );
    assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
}

#[test]
fn corrupt_header_crc_is_detected() {
    let mut dev = image(10 * MIB);
    let table = GptTable::create(10 * MIB, SectorSize::S512).unwrap();
    table.write_to(&mut dev).unwrap();

    // Flip one byte inside the primary header's disk GUID.
    let mut byte = [0u8; 1];
    dev.read_exact_at(&mut byte, 512 + 56).unwrap();
    byte[0] ^= 0xFF;
    dev.write_all_at(&byte, 512 + 56).unwrap();

    assert!(matches!(
        GptTable::read(&mut dev, SectorSize::S512),
        Err(PartError::ChecksumMismatch { field: "GPT header", .. })
    ));
}

#[test]
fn corrupt_entry_array_is_detected() {
    let mut dev = image(10 * MIB);
    let mut table = GptTable::create(10 * MIB, SectorSize::S512).unwrap();
    table
        .add_partition(GptPartition::new(Guid::LINUX_FILESYSTEM, 2048, 4096, "data"))
        .unwrap();
    table.write_to(&mut dev).unwrap();

    let mut byte = [0u8; 1];
    dev.read_exact_at(&mut byte, 2 * 512).unwrap();
    byte[0] ^= 0x01;
    dev.write_all_at(&byte, 2 * 512).unwrap();

    assert!(matches!(
        GptTable::read(&mut dev, SectorSize::S512),
        Err(PartError::ChecksumMismatch { field: "GPT entry array", .. })
    ));
}

#[test]
fn resize_checks_partition_bounds() {
    let mut table = GptTable::create(20 * MIB, SectorSize::S512).unwrap();
    table
        .add_partition(GptPartition::new(Guid::LINUX_FILESYSTEM, 2048, 21500, "data"))
        .unwrap();

    // 11 decimal megabytes leaves the last usable sector at 21450, below
    // the partition end.
    assert!(matches!(
        table.resize(11_000_000),
        Err(PartError::PartitionOverflow)
    ));
    // Nothing moved on failure.
    assert_eq!(table.partitions()[0].last_lba, 21500);
    assert_eq!(table.total_size(), 20 * MIB);

    table.resize(30 * MIB).unwrap();
    assert_eq!(table.total_size(), 30 * MIB);
    assert_eq!(table.last_usable_sector(), 30 * MIB / 512 - 34);
    assert_eq!(table.partitions()[0].first_lba, 2048);
    assert_eq!(table.partitions()[0].last_lba, 21500);
    // Invariant: the usable span leaves room for the secondary table.
    assert!(table.last_usable_sector() * 512 <= 30 * MIB - 33 * 512);
}

#[test]
fn expand_respects_neighbours_and_limits() {
    let mut table = GptTable::create(10 * MIB, SectorSize::S512).unwrap();
    let a = table
        .add_partition(GptPartition::new(Guid::LINUX_FILESYSTEM, 2048, 4095, "a"))
        .unwrap();
    let b = table
        .add_partition(GptPartition::new(Guid::LINUX_FILESYSTEM, 8192, 10239, "b"))
        .unwrap();

    table.expand_partition(a, 1024).unwrap();
    assert_eq!(table.partitions()[a].last_lba, 5119);

    // Growing into partition b fails.
    assert!(matches!(
        table.expand_partition(a, 4096),
        Err(PartError::PartitionOverflow)
    ));
    // Growing b past the usable area fails.
    assert!(matches!(
        table.expand_partition(b, 1 << 32),
        Err(PartError::PartitionOverflow)
    ));
}

#[test]
fn contents_stream_and_overflow() {
    let mut dev = image(10 * MIB);
    let mut table = GptTable::create(10 * MIB, SectorSize::S512).unwrap();
    // Eight sectors of capacity.
    let idx = table
        .add_partition(GptPartition::new(Guid::BASIC_DATA, 2048, 2055, "scratch"))
        .unwrap();
    table.write_to(&mut dev).unwrap();

    let payload = vec![0x5Au8; 1024];
    let written = table
        .write_contents(&mut dev, idx, &mut payload.as_slice())
        .unwrap();
    assert_eq!(written, 1024);

    let mut out = Vec::new();
    let read = table.read_contents(&mut dev, idx, &mut out).unwrap();
    assert_eq!(read, 8 * 512);
    assert_eq!(&out[..1024], payload.as_slice());

    let oversized = vec![0xA5u8; 8 * 512 + 1];
    match table.write_contents(&mut dev, idx, &mut oversized.as_slice()) {
        Err(PartError::PartitionFull(written)) => assert_eq!(written, 8 * 512),
        other => panic!("expected PartitionFull, got {other:?}"),
    }
}

#[test]
fn repair_follows_disk_growth() {
    let mut table = GptTable::create(10 * MIB, SectorSize::S512).unwrap();
    table.repair(40 * MIB);
    assert_eq!(table.secondary_header_sector(), 40 * MIB / 512 - 1);
    assert_eq!(table.last_usable_sector(), 40 * MIB / 512 - 34);
}

#[test]
fn detection_prefers_gpt() {
    let mut dev = image(10 * MIB);
    let table = GptTable::create(10 * MIB, SectorSize::S512).unwrap();
    table.write_to(&mut dev).unwrap();

    match read_table(&mut dev, SectorSize::S512).unwrap() {
        Some(Table::Gpt(read)) => assert_eq!(read, table),
        other => panic!("expected a GPT, got {other:?}"),
    }
}

#[test]
fn blank_disk_has_no_table() {
    let mut dev = image(MIB);
    assert!(read_table(&mut dev, SectorSize::S512).unwrap().is_none());
}
