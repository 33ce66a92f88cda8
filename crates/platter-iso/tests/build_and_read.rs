use std::collections::BTreeSet;
use std::io::Cursor;

use platter_iso::{
    ElToritoOptions, FormatOptions, IsoError, IsoImage, PlatformId, StageTree, format_new,
};

fn build(tree: &StageTree, options: &FormatOptions) -> Cursor<Vec<u8>> {
    let mut image = Cursor::new(Vec::new());
    format_new(&mut image, tree, options).unwrap();
    image
}

#[test]
fn root_listing_and_file_contents() {
    let mut tree = StageTree::new();
    for dir in ["FOO", "BAR", "ABC"] {
        tree.add_dir(dir).unwrap();
        tree.add_file_data(&format!("{dir}/dummy.bin"), vec![0xAB; 100])
            .unwrap();
    }
    tree.add_file_data("FOO/FILENAME_50", b"filename_50\n".to_vec())
        .unwrap();
    tree.add_file_data("README.MD", b"# platter\n".to_vec())
        .unwrap();

    let mut image = build(&tree, &FormatOptions::default().with_volume_id("TESTDISC"));
    let mut iso = IsoImage::parse(&mut image).unwrap();
    assert_eq!(iso.label(), "TESTDISC");

    let names: BTreeSet<String> = iso
        .read_dir("/")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    let expected: BTreeSet<String> = ["ABC", "BAR", "FOO", "README.MD"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(names, expected);

    assert_eq!(
        iso.read_file("/FOO/FILENAME_50").unwrap(),
        b"filename_50\n"
    );
    assert_eq!(iso.read_file("/README.MD").unwrap(), b"# platter\n");
}

#[test]
fn missing_paths_are_not_found() {
    let mut tree = StageTree::new();
    tree.add_file_data("A/file.txt", b"x".to_vec()).unwrap();
    let mut image = build(&tree, &FormatOptions::default());
    let mut iso = IsoImage::parse(&mut image).unwrap();

    assert!(matches!(
        iso.read_dir("/NOPE"),
        Err(IsoError::NotFound(_))
    ));
    assert!(matches!(
        iso.read_file("/A/ABSENT.TXT"),
        Err(IsoError::NotFound(_))
    ));
}

#[test]
fn names_are_canonicalized_without_rock_ridge() {
    let mut tree = StageTree::new();
    tree.add_file_data("some long file name.txt", b"data".to_vec())
        .unwrap();
    let mut image = build(&tree, &FormatOptions::default());
    let mut iso = IsoImage::parse(&mut image).unwrap();
    assert!(!iso.has_rock_ridge());

    let entries = iso.read_dir("/").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "SOMELONGFILENAME.TXT");
    assert_eq!(entries[0].short_name, "SOMELONGFILENAME.TXT;1");
    assert_eq!(iso.read_file("/SOMELONGFILENAME.TXT").unwrap(), b"data");
}

#[test]
fn rock_ridge_preserves_names_and_modes() {
    let mut tree = StageTree::new();
    tree.add_file(
        "Hello World.txt",
        platter_iso::FileSource::Data(b"greetings".to_vec()),
        0o600,
    )
    .unwrap();
    tree.add_dir("Mixed Case Dir").unwrap();

    let mut image = build(&tree, &FormatOptions::default().with_rock_ridge());
    let mut iso = IsoImage::parse(&mut image).unwrap();
    assert!(iso.has_rock_ridge());

    let entries = iso.read_dir("/").unwrap();
    let file = entries.iter().find(|e| !e.is_dir).unwrap();
    assert_eq!(file.name, "Hello World.txt");
    assert_eq!(file.mode.unwrap() & 0o7777, 0o600);
    assert_eq!(file.mode.unwrap() & 0o170_000, 0o100_000);

    let dir = entries.iter().find(|e| e.is_dir).unwrap();
    assert_eq!(dir.name, "Mixed Case Dir");

    assert_eq!(iso.read_file("/Hello World.txt").unwrap(), b"greetings");
}

#[test]
fn deep_trees_need_rock_ridge() {
    let deep_path = (1..=12)
        .map(|i| format!("L{i}"))
        .collect::<Vec<_>>()
        .join("/");
    let mut tree = StageTree::new();
    tree.add_file_data(&format!("{deep_path}/deep.txt"), b"bottom\n".to_vec())
        .unwrap();

    let mut sink = Cursor::new(Vec::new());
    assert!(matches!(
        format_new(&mut sink, &tree, &FormatOptions::default()),
        Err(IsoError::TooDeep)
    ));

    let mut image = build(&tree, &FormatOptions::default().with_rock_ridge());
    let mut iso = IsoImage::parse(&mut image).unwrap();

    // The full path still resolves, through the relocation child link.
    assert_eq!(
        iso.read_file(&format!("/{deep_path}/deep.txt")).unwrap(),
        b"bottom\n"
    );
    let listing = iso.read_dir(&format!("/{deep_path}")).unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "deep.txt");

    // Relocated directories do not show up under the adoption directory.
    assert!(iso.read_dir("/RR_MOVED").unwrap().is_empty());
}

#[test]
fn el_torito_hides_the_boot_file_but_keeps_it_addressable() {
    let boot_payload = vec![0x5A; 3000];
    let mut tree = StageTree::new();
    tree.add_file_data("BOOT1.IMG", boot_payload.clone()).unwrap();
    tree.add_file_data("OTHER.TXT", b"visible".to_vec()).unwrap();

    let mut el_torito = ElToritoOptions::single(PlatformId::X86, "/BOOT1.IMG");
    el_torito.platform = PlatformId::Efi;
    el_torito.entries[0].hide = true;

    let mut image = build(
        &tree,
        &FormatOptions::default().with_el_torito(el_torito),
    );
    let mut iso = IsoImage::parse(&mut image).unwrap();

    let names: Vec<String> = iso
        .read_dir("/")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["OTHER.TXT"]);

    let catalog = iso.boot_catalog().unwrap().expect("boot catalog present");
    assert_eq!(
        PlatformId::from_u8(catalog.validation.platform_id),
        PlatformId::Efi
    );
    let default = &catalog.default_entry;
    assert!(default.is_bootable());
    // load_size derives from the file size in virtual 512-byte sectors.
    assert_eq!(default.sector_count.get(), 6);

    let bytes = iso
        .read_blocks(default.load_rba.get(), boot_payload.len())
        .unwrap();
    assert_eq!(bytes, boot_payload);
}

#[test]
fn four_k_block_images_round_trip() {
    let mut tree = StageTree::new();
    tree.add_file_data("DATA.BIN", vec![7u8; 5000]).unwrap();
    let mut image = build(&tree, &FormatOptions::default().with_block_size(4096));
    let mut iso = IsoImage::parse(&mut image).unwrap();
    assert_eq!(iso.block_size(), 4096);
    assert_eq!(iso.read_file("/DATA.BIN").unwrap(), vec![7u8; 5000]);
}

#[test]
fn stat_reports_sizes_and_kinds() {
    let mut tree = StageTree::new();
    tree.add_file_data("DIR/FILE.BIN", vec![1u8; 1234]).unwrap();
    let mut image = build(&tree, &FormatOptions::default());
    let mut iso = IsoImage::parse(&mut image).unwrap();

    let root = iso.stat("/").unwrap();
    assert!(root.is_dir);

    let dir = iso.stat("/DIR").unwrap();
    assert!(dir.is_dir);

    let file = iso.stat("/DIR/FILE.BIN").unwrap();
    assert!(!file.is_dir);
    assert_eq!(file.size, 1234);
}
