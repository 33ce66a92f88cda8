//! The finalizer: walks a staging tree, assigns every directory and file
//! an extent, and lays the finished image into a writer in one pass.
//!
//! Layout order: system area (blocks 0..16), volume descriptors,
//! directory extents (depth-first, alphabetical at each level), the L and
//! M path tables, file extents in the same traversal order, and the boot
//! catalog last.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::IsoError;
use crate::datetime::{RecordedAt, image_timestamp};
use crate::path_table::{PathTable, PathTableEntry, compare_idents};
use crate::record::{
    DirectoryRecord, FileFlags, IDENT_PARENT, IDENT_SELF, SELF_RECORD_LEN, pack_records,
    packed_size,
};
use crate::stage::{StageTree, StagedFile};
use crate::susp;
use crate::types::{canonical_name, validate_name};
use crate::volume::{
    BootRecordVolumeDescriptor, DESCRIPTOR_START_BLOCK, PrimaryVolumeDescriptor, VALID_BLOCK_SIZES,
    VolumeDescriptor, VolumeDescriptorList,
};

#[cfg(feature = "el-torito")]
use crate::boot::{BootCatalog, BootSectionEntry, ElToritoOptions};

/// Directory nesting limit without Rock Ridge relocation.
const MAX_PLAIN_DEPTH: u32 = 8;
/// Synthetic directory that adopts relocated deep directories.
const RR_MOVED: &str = "RR_MOVED";

/// Options for one finalize run.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub volume_id: String,
    pub block_size: u32,
    /// Emit Rock Ridge entries (long names, POSIX modes, deep-tree
    /// relocation).
    pub rock_ridge: bool,
    /// Caller-supplied system area, at most 16 blocks.
    pub system_area: Option<Vec<u8>>,
    #[cfg(feature = "el-torito")]
    pub el_torito: Option<ElToritoOptions>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            volume_id: "ISOIMAGE".to_string(),
            block_size: 2048,
            rock_ridge: false,
            system_area: None,
            #[cfg(feature = "el-torito")]
            el_torito: None,
        }
    }
}

impl FormatOptions {
    pub fn with_volume_id(mut self, volume_id: &str) -> Self {
        self.volume_id = volume_id.to_string();
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_rock_ridge(mut self) -> Self {
        self.rock_ridge = true;
        self
    }

    pub fn with_system_area(mut self, system_area: Vec<u8>) -> Self {
        self.system_area = Some(system_area);
        self
    }

    #[cfg(feature = "el-torito")]
    pub fn with_el_torito(mut self, el_torito: ElToritoOptions) -> Self {
        self.el_torito = Some(el_torito);
        self
    }

    fn validate(&self) -> Result<(), IsoError> {
        if !VALID_BLOCK_SIZES.contains(&self.block_size) {
            return Err(IsoError::InvalidArgument(format!(
                "logical block size {} (expected 2048, 4096 or 8192)",
                self.block_size
            )));
        }
        if let Some(area) = &self.system_area {
            if area.len() > 16 * self.block_size as usize {
                return Err(IsoError::InvalidArgument(
                    "system area exceeds 16 blocks".to_string(),
                ));
            }
        }
        let id = self.volume_id.to_ascii_uppercase();
        if id.is_empty() || id.len() > 32 || crate::types::IsoStrD::<32>::from_str(&id).is_err() {
            return Err(IsoError::InvalidName(self.volume_id.clone()));
        }
        Ok(())
    }
}

/// What a finalize run produced.
#[derive(Debug, Clone, Copy)]
pub struct LayoutSummary {
    pub total_blocks: u32,
    pub total_bytes: u64,
}

struct Node {
    /// On-disk identifier bytes; empty for the root.
    short: Vec<u8>,
    /// The staged name, kept for Rock Ridge `NM` entries.
    long_name: String,
    is_dir: bool,
    parent: usize,
    children: Vec<usize>,
    depth: u32,
    size: u64,
    extent: u32,
    source: Option<StagedFile>,
    mode: u32,
    hidden: bool,
    relocated: bool,
    /// For a relocation placeholder: the node the `CL` entry points at.
    cl_target: Option<usize>,
}

impl Node {
    fn dir(short: Vec<u8>, long_name: String, parent: usize, depth: u32) -> Self {
        Self {
            short,
            long_name,
            is_dir: true,
            parent,
            children: Vec::new(),
            depth,
            size: 0,
            extent: 0,
            source: None,
            mode: 0o755,
            hidden: false,
            relocated: false,
            cl_target: None,
        }
    }

    fn px_mode(&self) -> u32 {
        if self.is_dir || self.cl_target.is_some() {
            0o040_000 | (self.mode & 0o7777)
        } else if self.mode & 0o170_000 == 0 {
            0o100_000 | (self.mode & 0o7777)
        } else {
            self.mode
        }
    }
}

struct Finalizer {
    nodes: Vec<Node>,
    block_size: usize,
    rock_ridge: bool,
    recorded: RecordedAt,
}

/// Writes `tree` as an ISO 9660 image into `writer`, which must be
/// positioned anywhere (all access is by absolute offset).
pub fn format_new<W: Read + Write + Seek>(
    writer: &mut W,
    tree: &StageTree,
    options: &FormatOptions,
) -> Result<LayoutSummary, IsoError> {
    options.validate()?;
    let timestamp = image_timestamp();
    let mut finalizer = Finalizer {
        nodes: Vec::new(),
        block_size: options.block_size as usize,
        rock_ridge: options.rock_ridge,
        recorded: RecordedAt::from_datetime(timestamp),
    };
    finalizer.build_nodes(tree)?;
    finalizer.check_depth()?;
    finalizer.run(writer, options, timestamp)
}

/// Creates `path` and formats it, truncating to the exact image size.
pub fn format_file<P: AsRef<std::path::Path>>(
    path: P,
    tree: &StageTree,
    options: &FormatOptions,
) -> Result<std::fs::File, IsoError> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    let summary = format_new(&mut file, tree, options)?;
    file.set_len(summary.total_bytes)?;
    file.flush()?;
    Ok(file)
}

impl Finalizer {
    fn build_nodes(&mut self, tree: &StageTree) -> Result<(), IsoError> {
        use std::collections::BTreeMap;
        self.nodes = vec![Node::dir(Vec::new(), String::new(), 0, 1)];
        let mut by_path: BTreeMap<String, usize> = BTreeMap::new();
        by_path.insert(String::new(), 0);

        // Sorted iteration guarantees parents appear before children.
        for path in tree.dirs() {
            let (parent_path, name) = path.rsplit_once('/').unwrap_or(("", path));
            let parent = *by_path
                .get(parent_path)
                .expect("staging tree lists parents first");
            // A name has to fit one NM entry.
            if name.len() > 250 {
                return Err(IsoError::InvalidName(name.to_string()));
            }
            let short = canonical_name(name, true);
            validate_name(&short, true).map_err(|_| IsoError::InvalidName(name.to_string()))?;
            let depth = self.nodes[parent].depth + 1;
            let node = Node::dir(short.into_bytes(), name.to_string(), parent, depth);
            let idx = self.push_child(parent, node)?;
            by_path.insert(path.to_string(), idx);
        }

        for (path, staged) in tree.files() {
            let (parent_path, name) = path.rsplit_once('/').unwrap_or(("", path));
            let parent = *by_path
                .get(parent_path)
                .expect("staging tree lists parents first");
            if name.len() > 250 {
                return Err(IsoError::InvalidName(name.to_string()));
            }
            let short = canonical_name(name, false);
            validate_name(&short, false).map_err(|_| IsoError::InvalidName(name.to_string()))?;
            let node = Node {
                short: short.into_bytes(),
                long_name: name.to_string(),
                is_dir: false,
                parent,
                children: Vec::new(),
                depth: self.nodes[parent].depth + 1,
                size: staged.size,
                extent: 0,
                source: Some(staged.clone()),
                mode: staged.mode,
                hidden: false,
                relocated: false,
                cl_target: None,
            };
            self.push_child(parent, node)?;
        }
        Ok(())
    }

    fn push_child(&mut self, parent: usize, node: Node) -> Result<usize, IsoError> {
        let clash = self.nodes[parent]
            .children
            .iter()
            .any(|&c| self.nodes[c].short == node.short);
        if clash {
            return Err(IsoError::InvalidName(format!(
                "{} collides with a sibling after canonicalization",
                node.long_name
            )));
        }
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.push(idx);
        Ok(idx)
    }

    /// Rejects or relocates directories nested past eight levels.
    fn check_depth(&mut self) -> Result<(), IsoError> {
        if !self.rock_ridge {
            if self
                .nodes
                .iter()
                .any(|n| n.is_dir && n.depth > MAX_PLAIN_DEPTH)
            {
                return Err(IsoError::TooDeep);
            }
            return Ok(());
        }

        let mut rr_moved: Option<usize> = None;
        loop {
            // The shallowest violator: a directory at depth 9 whose
            // parent is still within bounds.
            let deep = self.nodes.iter().position(|n| {
                n.is_dir && n.depth > MAX_PLAIN_DEPTH && !n.short.is_empty() && {
                    let parent_depth = self.nodes[n.parent].depth;
                    parent_depth <= MAX_PLAIN_DEPTH
                }
            });
            let Some(deep) = deep else { break };

            let adopter = match rr_moved {
                Some(idx) => idx,
                None => {
                    let node =
                        Node::dir(RR_MOVED.as_bytes().to_vec(), RR_MOVED.to_string(), 0, 2);
                    let idx = self.push_child(0, node)?;
                    rr_moved = Some(idx);
                    idx
                }
            };

            log::debug!(
                "relocating deep directory {:?} under /{RR_MOVED}",
                self.nodes[deep].long_name
            );

            // A placeholder stays behind in the original parent; its CL
            // entry carries the new location.
            let old_parent = self.nodes[deep].parent;
            let placeholder = Node {
                short: self.nodes[deep].short.clone(),
                long_name: self.nodes[deep].long_name.clone(),
                is_dir: false,
                parent: old_parent,
                children: Vec::new(),
                depth: self.nodes[old_parent].depth + 1,
                size: 0,
                extent: 0,
                source: None,
                mode: self.nodes[deep].mode,
                hidden: false,
                relocated: false,
                cl_target: Some(deep),
            };
            let placeholder_idx = self.nodes.len();
            self.nodes.push(placeholder);
            let pos = self.nodes[old_parent]
                .children
                .iter()
                .position(|&c| c == deep)
                .expect("deep directory is its parent's child");
            self.nodes[old_parent].children[pos] = placeholder_idx;

            self.nodes[deep].parent = adopter;
            self.nodes[deep].relocated = true;
            self.nodes[adopter].children.push(deep);
            self.refresh_depths(deep, 3);
        }
        Ok(())
    }

    fn refresh_depths(&mut self, idx: usize, depth: u32) {
        self.nodes[idx].depth = depth;
        let children = self.nodes[idx].children.clone();
        for child in children {
            self.refresh_depths(child, depth + 1);
        }
    }

    fn sort_children(&mut self) {
        for idx in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[idx].children);
            children.sort_by(|&a, &b| compare_idents(&self.nodes[a].short, &self.nodes[b].short));
            self.nodes[idx].children = children;
        }
    }

    fn self_system_use(&self, is_root: bool) -> Vec<u8> {
        if !self.rock_ridge {
            return Vec::new();
        }
        let mut area = Vec::new();
        if is_root {
            area.extend_from_slice(&susp::sp_entry(0));
        }
        area.extend_from_slice(&susp::px_entry(0o040_755, 2, 0, 0));
        if is_root {
            area.extend_from_slice(&susp::er_rock_ridge_entry());
        }
        susp::pad_area(area)
    }

    fn child_system_use(&self, idx: usize) -> Vec<u8> {
        if !self.rock_ridge {
            return Vec::new();
        }
        let node = &self.nodes[idx];
        let mut area = susp::nm_entry(&node.long_name);
        area.extend_from_slice(&susp::px_entry(
            node.px_mode(),
            if node.is_dir { 2 } else { 1 },
            0,
            0,
        ));
        if let Some(target) = node.cl_target {
            area.extend_from_slice(&susp::cl_entry(self.nodes[target].extent));
        }
        if node.relocated {
            area.extend_from_slice(&susp::re_entry());
        }
        susp::pad_area(area)
    }

    fn child_record_len(&self, idx: usize) -> usize {
        let node = &self.nodes[idx];
        let ident_len = node.short.len();
        33 + ident_len + (ident_len + 1) % 2 + self.child_system_use(idx).len()
    }

    /// Directory data length from the record-packing rules.
    fn compute_dir_sizes(&mut self) {
        for idx in 0..self.nodes.len() {
            if !self.nodes[idx].is_dir {
                continue;
            }
            let mut lens = vec![
                SELF_RECORD_LEN + self.self_system_use(idx == 0).len(),
                SELF_RECORD_LEN + self.self_system_use(false).len(),
            ];
            lens.extend(
                self.nodes[idx]
                    .children
                    .iter()
                    .map(|&c| self.child_record_len(c)),
            );
            self.nodes[idx].size = packed_size(lens, self.block_size);
        }
    }

    /// Depth-first directory order, children alphabetical.
    fn dir_order(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            for &child in self.nodes[idx].children.iter().rev() {
                if self.nodes[child].is_dir {
                    stack.push(child);
                }
            }
        }
        order
    }

    /// Path-table order: depth, then parent position, then identifier.
    fn build_path_table(&self, dir_order: &[usize]) -> PathTable {
        let mut table_index = vec![0u16; self.nodes.len()];
        table_index[0] = 1;
        let mut ordered: Vec<usize> = vec![0];

        let max_depth = self
            .nodes
            .iter()
            .filter(|n| n.is_dir)
            .map(|n| n.depth)
            .max()
            .unwrap_or(1);
        for depth in 2..=max_depth {
            let mut level: Vec<usize> = dir_order
                .iter()
                .copied()
                .filter(|&i| self.nodes[i].is_dir && self.nodes[i].depth == depth)
                .collect();
            level.sort_by(|&a, &b| {
                table_index[self.nodes[a].parent]
                    .cmp(&table_index[self.nodes[b].parent])
                    .then_with(|| compare_idents(&self.nodes[a].short, &self.nodes[b].short))
            });
            for idx in level {
                table_index[idx] = (ordered.len() + 1) as u16;
                ordered.push(idx);
            }
        }

        let entries = ordered
            .iter()
            .map(|&idx| {
                if idx == 0 {
                    PathTableEntry::root(self.nodes[0].extent)
                } else {
                    PathTableEntry {
                        ident: self.nodes[idx].short.clone(),
                        ext_attr_len: 0,
                        extent: self.nodes[idx].extent,
                        parent: table_index[self.nodes[idx].parent],
                    }
                }
            })
            .collect();
        PathTable { entries }
    }

    fn blocks_for(&self, bytes: u64) -> u32 {
        bytes.div_ceil(self.block_size as u64) as u32
    }

    fn run<W: Read + Write + Seek>(
        mut self,
        writer: &mut W,
        options: &FormatOptions,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<LayoutSummary, IsoError> {
        let bs = self.block_size;
        self.sort_children();
        self.compute_dir_sizes();

        // Descriptor set: primary, optional boot record, terminator.
        #[cfg(feature = "el-torito")]
        let has_boot = options.el_torito.is_some();
        #[cfg(not(feature = "el-torito"))]
        let has_boot = false;

        let mut next_block = DESCRIPTOR_START_BLOCK as u64 + 2 + u64::from(has_boot);

        // Directories first.
        let dir_order = self.dir_order();
        for &idx in &dir_order {
            self.nodes[idx].extent = next_block as u32;
            next_block += self.blocks_for(self.nodes[idx].size) as u64;
        }

        // Both path tables, L form first.
        let path_table = self.build_path_table(&dir_order);
        let path_table_size = path_table.size();
        let l_table_block = next_block as u32;
        next_block += self.blocks_for(path_table_size) as u64;
        let m_table_block = next_block as u32;
        next_block += self.blocks_for(path_table_size) as u64;

        // Files, in the directory traversal order.
        for &dir in &dir_order {
            for child in self.nodes[dir].children.clone() {
                let node = &self.nodes[child];
                if node.is_dir || node.cl_target.is_some() {
                    continue;
                }
                let blocks = self.blocks_for(node.size);
                self.nodes[child].extent = next_block as u32;
                next_block += blocks as u64;
            }
        }

        // CL placeholders can now borrow their target's extent, and the
        // path table sees final directory locations.
        let path_table = self.build_path_table(&dir_order);

        #[cfg(feature = "el-torito")]
        let boot_plan = match &options.el_torito {
            Some(el_torito) => {
                let plan = self.plan_boot(el_torito, next_block as u32)?;
                next_block += self.blocks_for(plan.catalog.size() as u64) as u64;
                Some(plan)
            }
            None => None,
        };

        if next_block > u64::from(u32::MAX) {
            return Err(IsoError::InvalidArgument(
                "image exceeds the 2^32 block limit".to_string(),
            ));
        }
        let total_blocks = next_block as u32;
        let total_bytes = next_block * bs as u64;
        log::debug!("image layout complete: {total_blocks} blocks of {bs} bytes");

        // System area, with the caller's overlay if any.
        write_at(writer, 0, &vec![0u8; 16 * bs])?;
        if let Some(area) = &options.system_area {
            write_at(writer, 0, area)?;
        }

        // Directory extents.
        for &idx in &dir_order {
            let records = self.directory_records(idx);
            let packed = pack_records(&records, bs);
            debug_assert_eq!(packed.len() as u64, self.nodes[idx].size);
            write_at(writer, self.nodes[idx].extent as u64 * bs as u64, &packed)?;
        }

        // Path tables.
        write_at(
            writer,
            l_table_block as u64 * bs as u64,
            &pad_to_block(path_table.to_l_bytes(), bs),
        )?;
        write_at(
            writer,
            m_table_block as u64 * bs as u64,
            &pad_to_block(path_table.to_m_bytes(), bs),
        )?;

        // File contents.
        for idx in 0..self.nodes.len() {
            let Some(staged) = self.nodes[idx].source.clone() else {
                continue;
            };
            let offset = self.nodes[idx].extent as u64 * bs as u64;
            let written = copy_at(writer, offset, &staged)?;
            if written != self.nodes[idx].size {
                return Err(IsoError::InvalidArgument(format!(
                    "staged file {:?} changed size during finalize",
                    self.nodes[idx].long_name
                )));
            }
            let pad = (bs as u64 - written % bs as u64) % bs as u64;
            if pad > 0 {
                write_at(writer, offset + written, &vec![0u8; pad as usize])?;
            }
        }

        #[cfg(feature = "el-torito")]
        if let Some(plan) = &boot_plan {
            let mut catalog_bytes = Vec::new();
            plan.catalog.write(&mut catalog_bytes)?;
            write_at(
                writer,
                plan.catalog_block as u64 * bs as u64,
                &pad_to_block(catalog_bytes, bs),
            )?;
            for &node in &plan.info_tables {
                self.patch_boot_info_table(writer, node)?;
            }
        }

        // Descriptors last: the primary needs the final totals.
        let mut descriptors = VolumeDescriptorList::empty();
        let mut pvd =
            PrimaryVolumeDescriptor::new(&options.volume_id.to_ascii_uppercase(), bs as u32)?;
        pvd.volume_space_size.write(total_blocks);
        pvd.path_table_size.write(path_table_size as u32);
        pvd.type_l_path_table.set(l_table_block);
        pvd.type_m_path_table.set(m_table_block);
        pvd.creation = crate::datetime::DecDateTime::from_datetime(timestamp);
        pvd.modification = pvd.creation;
        let root_record = DirectoryRecord::new(
            IDENT_SELF,
            self.nodes[0].extent,
            self.nodes[0].size as u32,
            FileFlags::DIRECTORY,
            self.recorded,
        );
        pvd.root_record.copy_from_slice(&root_record.to_bytes());
        descriptors.push(VolumeDescriptor::Primary(pvd));

        #[cfg(feature = "el-torito")]
        if let Some(plan) = &boot_plan {
            descriptors.push(VolumeDescriptor::BootRecord(BootRecordVolumeDescriptor::new(
                plan.catalog_block,
            )));
        }

        writer.seek(SeekFrom::Start(DESCRIPTOR_START_BLOCK * bs as u64))?;
        descriptors.write(writer)?;

        writer.seek(SeekFrom::Start(total_bytes))?;
        Ok(LayoutSummary {
            total_blocks,
            total_bytes,
        })
    }

    fn directory_records(&self, idx: usize) -> Vec<DirectoryRecord> {
        let node = &self.nodes[idx];
        let parent = &self.nodes[node.parent];
        let mut records = vec![
            DirectoryRecord::new(
                IDENT_SELF,
                node.extent,
                node.size as u32,
                FileFlags::DIRECTORY,
                self.recorded,
            )
            .with_system_use(self.self_system_use(idx == 0)),
            DirectoryRecord::new(
                IDENT_PARENT,
                parent.extent,
                parent.size as u32,
                FileFlags::DIRECTORY,
                self.recorded,
            )
            .with_system_use(self.self_system_use(false)),
        ];

        for &child_idx in &node.children {
            let child = &self.nodes[child_idx];
            let mut flags = if child.is_dir {
                FileFlags::DIRECTORY
            } else {
                FileFlags::empty()
            };
            if child.hidden {
                flags |= FileFlags::HIDDEN;
            }
            let (extent, data_len) = if child.cl_target.is_some() {
                (0, 0)
            } else {
                (child.extent, child.size as u32)
            };
            records.push(
                DirectoryRecord::new(&child.short, extent, data_len, flags, self.recorded)
                    .with_system_use(self.child_system_use(child_idx)),
            );
        }
        records
    }

    /// Resolves a staged path against the node tree, accepting both the
    /// staged name and its canonical form.
    #[cfg(feature = "el-torito")]
    fn resolve(&self, path: &str) -> Option<usize> {
        let mut current = 0usize;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for (pos, segment) in segments.iter().enumerate() {
            let last = pos == segments.len() - 1;
            let found = self.nodes[current].children.iter().copied().find(|&c| {
                let node = &self.nodes[c];
                node.long_name == *segment
                    || node.short == canonical_name(segment, node.is_dir).as_bytes()
                    || (last && node.short == segment.as_bytes())
            })?;
            current = found;
        }
        if current == 0 { None } else { Some(current) }
    }

    #[cfg(feature = "el-torito")]
    fn plan_boot(
        &mut self,
        options: &ElToritoOptions,
        catalog_block: u32,
    ) -> Result<BootPlan, IsoError> {
        let mut entries = Vec::new();
        let mut info_tables = Vec::new();
        for entry in &options.entries {
            let node = self
                .resolve(&entry.boot_file)
                .ok_or_else(|| IsoError::NotFound(entry.boot_file.clone()))?;
            if self.nodes[node].is_dir {
                return Err(IsoError::InvalidArgument(format!(
                    "boot image {:?} is a directory",
                    entry.boot_file
                )));
            }
            if entry.hide {
                self.nodes[node].hidden = true;
            }
            if entry.boot_info_table {
                info_tables.push(node);
            }
            let load_size = if entry.load_size != 0 {
                entry.load_size
            } else {
                u16::try_from(self.nodes[node].size.div_ceil(512)).unwrap_or(u16::MAX)
            };
            entries.push((
                entry.platform,
                BootSectionEntry::new(
                    entry.emulation,
                    entry.load_segment,
                    load_size,
                    self.nodes[node].extent,
                ),
            ));
        }
        let Some(((_, default_entry), rest)) = entries.split_first() else {
            return Err(IsoError::InvalidArgument(
                "el torito options carry no boot entries".to_string(),
            ));
        };
        let mut catalog = BootCatalog::new(options.platform, *default_entry);
        for (platform, entry) in rest {
            catalog.add_section(*platform, vec![*entry]);
        }
        Ok(BootPlan {
            catalog,
            catalog_block,
            info_tables,
        })
    }

    #[cfg(feature = "el-torito")]
    fn patch_boot_info_table<W: Read + Write + Seek>(
        &self,
        writer: &mut W,
        node: usize,
    ) -> Result<(), IsoError> {
        use platter_common::num::U32Le;

        let bs = self.block_size as u64;
        let offset = self.nodes[node].extent as u64 * bs;
        let len = self.nodes[node].size;
        let mut checksum = 0u32;
        if len > 64 {
            writer.seek(SeekFrom::Start(offset + 64))?;
            let mut remaining = len - 64;
            let mut buf = [0u8; 4096];
            while remaining > 0 {
                let chunk = remaining.min(buf.len() as u64) as usize;
                writer.read_exact(&mut buf[..chunk])?;
                for word in buf[..chunk].chunks(4) {
                    let mut bytes = [0u8; 4];
                    bytes[..word.len()].copy_from_slice(word);
                    checksum = checksum.wrapping_add(u32::from_le_bytes(bytes));
                }
                remaining -= chunk as u64;
            }
        }
        let table = crate::boot::BootInfoTable {
            pvd_block: U32Le::new(DESCRIPTOR_START_BLOCK as u32),
            file_block: U32Le::new(self.nodes[node].extent),
            file_len: U32Le::new(len as u32),
            checksum: U32Le::new(checksum),
        };
        write_at(writer, offset + 8, bytemuck::bytes_of(&table))?;
        Ok(())
    }
}

#[cfg(feature = "el-torito")]
struct BootPlan {
    catalog: BootCatalog,
    catalog_block: u32,
    info_tables: Vec<usize>,
}

fn write_at<W: Write + Seek>(writer: &mut W, offset: u64, bytes: &[u8]) -> Result<(), IsoError> {
    writer.seek(SeekFrom::Start(offset))?;
    writer.write_all(bytes)?;
    Ok(())
}

fn copy_at<W: Write + Seek>(
    writer: &mut W,
    offset: u64,
    staged: &StagedFile,
) -> Result<u64, IsoError> {
    writer.seek(SeekFrom::Start(offset))?;
    let mut reader = staged.open()?;
    let written = std::io::copy(&mut reader, writer)?;
    Ok(written)
}

fn pad_to_block(mut bytes: Vec<u8>, block_size: usize) -> Vec<u8> {
    let rem = bytes.len() % block_size;
    if rem != 0 {
        bytes.resize(bytes.len() + block_size - rem, 0);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_still_formats() {
        let tree = StageTree::new();
        let mut image = std::io::Cursor::new(Vec::new());
        let summary = format_new(&mut image, &tree, &FormatOptions::default()).unwrap();
        // System area, PVD, terminator, root directory, two path tables.
        assert_eq!(summary.total_blocks, 16 + 2 + 1 + 2);
        assert_eq!(image.get_ref().len() as u64, summary.total_bytes);
    }

    #[test]
    fn block_size_is_validated() {
        let tree = StageTree::new();
        let mut image = std::io::Cursor::new(Vec::new());
        let options = FormatOptions::default().with_block_size(1024);
        assert!(matches!(
            format_new(&mut image, &tree, &options),
            Err(IsoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn deep_tree_without_rock_ridge_fails() {
        let mut tree = StageTree::new();
        tree.add_dir("1/2/3/4/5/6/7/8/9").unwrap();
        let mut image = std::io::Cursor::new(Vec::new());
        assert!(matches!(
            format_new(&mut image, &tree, &FormatOptions::default()),
            Err(IsoError::TooDeep)
        ));

        // Depth 8 is still fine.
        let mut tree = StageTree::new();
        tree.add_dir("1/2/3/4/5/6/7").unwrap();
        format_new(&mut image, &tree, &FormatOptions::default()).unwrap();
    }

    #[test]
    fn same_epoch_same_bytes() {
        // SOURCE_DATE_EPOCH pins every timestamp, so two runs agree.
        unsafe { std::env::set_var("SOURCE_DATE_EPOCH", "1700000000") };
        let mut tree = StageTree::new();
        tree.add_file_data("docs/readme.md", b"hello\n".to_vec()).unwrap();
        tree.add_dir("empty").unwrap();

        let mut first = std::io::Cursor::new(Vec::new());
        format_new(&mut first, &tree, &FormatOptions::default()).unwrap();
        let mut second = std::io::Cursor::new(Vec::new());
        format_new(&mut second, &tree, &FormatOptions::default()).unwrap();
        assert_eq!(first.get_ref(), second.get_ref());
        unsafe { std::env::remove_var("SOURCE_DATE_EPOCH") };
    }
}
