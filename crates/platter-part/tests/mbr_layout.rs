use platter_io::{BlockDevice, MemBackend};
use platter_part::{MbrPartition, MbrPartitionType, MbrTable, PartError};

const MIB: usize = 1024 * 1024;

#[test]
fn on_disk_layout_matches_the_scheme() {
    let mut dev = MemBackend::new(10 * MIB);
    let mut table = MbrTable::default();
    table.partitions[0] = MbrPartition::new(MbrPartitionType::LinuxNative, 2048, 5000).bootable();
    table.write_to(&mut dev).unwrap();

    let bytes = dev.as_slice();
    assert_eq!(bytes[446], 0x80);
    assert_eq!(bytes[450], 0x83);
    assert_eq!(u32::from_le_bytes(bytes[454..458].try_into().unwrap()), 2048);
    assert_eq!(u32::from_le_bytes(bytes[458..462].try_into().unwrap()), 5000);
    assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
}

#[test]
fn write_preserves_bootstrap_area() {
    let mut dev = MemBackend::new(MIB);
    // Pretend some boot code and a disk signature are already there.
    let boot_code = [0xFAu8; 440];
    dev.write_all_at(&boot_code, 0).unwrap();
    dev.write_all_at(&0xCAFEBABEu32.to_le_bytes(), 440).unwrap();

    let mut table = MbrTable::default();
    table.partitions[0] = MbrPartition::new(MbrPartitionType::Fat32Lba, 64, 1024);
    table.write_to(&mut dev).unwrap();

    assert_eq!(&dev.as_slice()[..440], &boot_code[..]);

    let read = MbrTable::read(&mut dev).unwrap();
    assert_eq!(read.signature_string(), "cafebabe");
    assert_eq!(read.partition_uuid(0).unwrap(), "cafebabe-1");
    assert_eq!(read.partitions[0].start_lba, 64);
    assert_eq!(read.partitions[0].sectors, 1024);
    assert_eq!(read.partitions[0].kind(), MbrPartitionType::Fat32Lba);
    assert!(read.partitions[1].is_empty());
}

#[test]
fn missing_boot_signature_is_rejected() {
    let mut dev = MemBackend::new(MIB);
    assert!(matches!(
        MbrTable::read(&mut dev),
        Err(PartError::InvalidFormat(_))
    ));
}

#[test]
fn empty_slots_keep_their_place() {
    let mut dev = MemBackend::new(MIB);
    let mut table = MbrTable::default();
    table.partitions[2] = MbrPartition::new(MbrPartitionType::LinuxSwap, 4096, 2048);
    table.write_to(&mut dev).unwrap();

    let read = MbrTable::read(&mut dev).unwrap();
    assert!(read.partitions[0].is_empty());
    assert!(read.partitions[1].is_empty());
    assert_eq!(read.partitions[2].kind(), MbrPartitionType::LinuxSwap);
    assert_eq!(read.partition_uuid(2).unwrap(), "00000000-3");
}
