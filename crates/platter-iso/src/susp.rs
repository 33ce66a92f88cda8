//! The System Use Sharing Protocol and the Rock Ridge subset layered on
//! it. Each system-use entry is `sig[2] len version data…`; the `SP`
//! entry in the root's self record switches the protocol on and gives the
//! number of bytes to skip in every subsequent system-use area.

use crate::IsoError;
use crate::types::U32LsbMsb;

pub const NM_CONTINUE: u8 = 1 << 0;
pub const SL_CONTINUE: u8 = 1 << 0;

const SP_CHECK: [u8; 2] = [0xBE, 0xEF];

/// One parsed system-use entry, limited to the repertoire this library
/// understands; everything else is carried as `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspEntry {
    /// Protocol marker: present in the root self record only.
    Sp { skip: u8 },
    /// Continuation area holding more entries.
    Ce { block: u32, offset: u32, length: u32 },
    /// Extension reference, e.g. the Rock Ridge identifier.
    Er { id: Vec<u8> },
    /// Alternate (long) name fragment.
    Nm { flags: u8, name: Vec<u8> },
    /// POSIX mode and link count (plus uid/gid).
    Px {
        mode: u32,
        nlink: u32,
        uid: u32,
        gid: u32,
    },
    /// Symbolic-link target, already joined from its component records.
    Sl { flags: u8, target: String },
    /// Child link: directory content relocated to this block.
    Cl { block: u32 },
    /// Marks a relocated directory that listings must hide.
    Re,
    Unknown { sig: [u8; 2] },
}

fn both_endian_u32(data: &[u8]) -> Result<u32, IsoError> {
    if data.len() < 8 {
        return Err(IsoError::InvalidFormat("both-endian system-use field"));
    }
    let pair: U32LsbMsb = *bytemuck::from_bytes(&data[..8]);
    pair.read_checked()
}

fn push_both_endian_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(bytemuck::bytes_of(&U32LsbMsb::new(value)));
}

/// Parses one system-use area (already stripped of the `SP` skip bytes).
/// Trailing zero padding ends the walk.
pub fn parse_system_use(bytes: &[u8]) -> Result<Vec<SuspEntry>, IsoError> {
    let mut entries = Vec::new();
    let mut pos = 0;
    while pos + 4 <= bytes.len() {
        if bytes[pos] == 0 {
            break;
        }
        let sig = [bytes[pos], bytes[pos + 1]];
        let len = bytes[pos + 2] as usize;
        if len < 4 || pos + len > bytes.len() {
            return Err(IsoError::InvalidFormat("system-use entry length"));
        }
        let data = &bytes[pos + 4..pos + len];
        let entry = match &sig {
            b"SP" => {
                if data.len() < 3 || data[..2] != SP_CHECK {
                    return Err(IsoError::InvalidFormat("SP check bytes"));
                }
                SuspEntry::Sp { skip: data[2] }
            }
            b"CE" => {
                if data.len() < 24 {
                    return Err(IsoError::InvalidFormat("CE entry length"));
                }
                SuspEntry::Ce {
                    block: both_endian_u32(&data[0..8])?,
                    offset: both_endian_u32(&data[8..16])?,
                    length: both_endian_u32(&data[16..24])?,
                }
            }
            b"ER" => {
                if data.len() < 4 {
                    return Err(IsoError::InvalidFormat("ER entry length"));
                }
                let id_len = data[0] as usize;
                if 4 + id_len > data.len() {
                    return Err(IsoError::InvalidFormat("ER identifier length"));
                }
                SuspEntry::Er {
                    id: data[4..4 + id_len].to_vec(),
                }
            }
            b"NM" => {
                if data.is_empty() {
                    return Err(IsoError::InvalidFormat("NM entry length"));
                }
                SuspEntry::Nm {
                    flags: data[0],
                    name: data[1..].to_vec(),
                }
            }
            b"PX" => {
                if data.len() < 32 {
                    return Err(IsoError::InvalidFormat("PX entry length"));
                }
                SuspEntry::Px {
                    mode: both_endian_u32(&data[0..8])?,
                    nlink: both_endian_u32(&data[8..16])?,
                    uid: both_endian_u32(&data[16..24])?,
                    gid: both_endian_u32(&data[24..32])?,
                }
            }
            b"SL" => {
                if data.is_empty() {
                    return Err(IsoError::InvalidFormat("SL entry length"));
                }
                SuspEntry::Sl {
                    flags: data[0],
                    target: parse_sl_components(&data[1..])?,
                }
            }
            b"CL" => SuspEntry::Cl {
                block: both_endian_u32(data)?,
            },
            b"RE" => SuspEntry::Re,
            _ => SuspEntry::Unknown { sig },
        };
        entries.push(entry);
        pos += len;
    }
    Ok(entries)
}

fn parse_sl_components(mut data: &[u8]) -> Result<String, IsoError> {
    let mut parts: Vec<String> = Vec::new();
    while data.len() >= 2 {
        let flags = data[0];
        let len = data[1] as usize;
        if flags == 0 && len == 0 {
            break; // trailing padding
        }
        if 2 + len > data.len() {
            return Err(IsoError::InvalidFormat("SL component length"));
        }
        let content = &data[2..2 + len];
        if flags & 0x08 != 0 {
            parts.clear();
            parts.push(String::new()); // leading slash
        } else if flags & 0x04 != 0 {
            parts.push("..".to_string());
        } else if flags & 0x02 != 0 {
            parts.push(".".to_string());
        } else {
            parts.push(String::from_utf8_lossy(content).into_owned());
        }
        data = &data[2 + len..];
    }
    Ok(parts.join("/"))
}

// Encoders for the writer side. Every builder returns an even-length
// entry so record lengths stay even.

pub fn sp_entry(skip: u8) -> Vec<u8> {
    vec![b'S', b'P', 7, 1, SP_CHECK[0], SP_CHECK[1], skip, 0]
}

pub fn er_rock_ridge_entry() -> Vec<u8> {
    let id = b"RRIP_1991A";
    let mut out = vec![b'E', b'R', (8 + id.len()) as u8, 1];
    out.push(id.len() as u8); // LEN_ID
    out.push(0); // LEN_DES
    out.push(0); // LEN_SRC
    out.push(1); // EXT_VER
    out.extend_from_slice(id);
    out
}

pub fn nm_entry(name: &str) -> Vec<u8> {
    let mut out = vec![b'N', b'M', (5 + name.len()) as u8, 1, 0];
    out.extend_from_slice(name.as_bytes());
    out
}

/// Pads an assembled system-use area to even length. A single zero byte
/// is plain padding; parsers stop at it.
pub fn pad_area(mut area: Vec<u8>) -> Vec<u8> {
    if area.len() % 2 == 1 {
        area.push(0);
    }
    area
}

pub fn px_entry(mode: u32, nlink: u32, uid: u32, gid: u32) -> Vec<u8> {
    let mut out = vec![b'P', b'X', 36, 1];
    push_both_endian_u32(&mut out, mode);
    push_both_endian_u32(&mut out, nlink);
    push_both_endian_u32(&mut out, uid);
    push_both_endian_u32(&mut out, gid);
    out
}

pub fn cl_entry(block: u32) -> Vec<u8> {
    let mut out = vec![b'C', b'L', 12, 1];
    push_both_endian_u32(&mut out, block);
    out
}

pub fn re_entry() -> Vec<u8> {
    vec![b'R', b'E', 4, 1]
}

/// What the reader distilled from one record's system-use area.
#[derive(Debug, Default, Clone)]
pub struct RockRidgeInfo {
    pub name: Option<String>,
    pub mode: Option<u32>,
    pub nlink: Option<u32>,
    pub symlink: Option<String>,
    pub child_link: Option<u32>,
    pub relocated: bool,
    pub continuation: Option<(u32, u32, u32)>,
}

impl RockRidgeInfo {
    /// Folds a batch of entries in, concatenating NM fragments while the
    /// CONTINUE flag is set.
    pub fn absorb(&mut self, entries: &[SuspEntry], name_buf: &mut Vec<u8>, name_done: &mut bool) {
        for entry in entries {
            match entry {
                SuspEntry::Nm { flags, name } => {
                    if !*name_done {
                        name_buf.extend_from_slice(name);
                        if flags & NM_CONTINUE == 0 {
                            *name_done = true;
                            self.name = Some(String::from_utf8_lossy(name_buf).into_owned());
                        }
                    }
                }
                SuspEntry::Px { mode, nlink, .. } => {
                    self.mode = Some(*mode);
                    self.nlink = Some(*nlink);
                }
                SuspEntry::Sl { target, .. } => self.symlink = Some(target.clone()),
                SuspEntry::Cl { block } => self.child_link = Some(*block),
                SuspEntry::Re => self.relocated = true,
                SuspEntry::Ce {
                    block,
                    offset,
                    length,
                } => self.continuation = Some((*block, *offset, *length)),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sp_round_trip() {
        let entries = parse_system_use(&sp_entry(0)).unwrap();
        assert_eq!(entries, vec![SuspEntry::Sp { skip: 0 }]);
    }

    #[test]
    fn px_round_trip() {
        let bytes = px_entry(0o100644, 1, 0, 0);
        assert_eq!(bytes.len(), 36);
        let entries = parse_system_use(&bytes).unwrap();
        assert_eq!(
            entries,
            vec![SuspEntry::Px {
                mode: 0o100644,
                nlink: 1,
                uid: 0,
                gid: 0
            }]
        );
    }

    #[test]
    fn nm_entries_are_even_and_concatenate() {
        // An odd-length entry pads out to an even area.
        let bytes = pad_area(nm_entry("even"));
        assert_eq!(bytes.len() % 2, 0);

        // Two fragments with the CONTINUE flag on the first.
        let mut first = nm_entry("long_");
        first[4] |= NM_CONTINUE;
        let second = nm_entry("name.txt");
        let mut area = first;
        area.extend_from_slice(&second);

        let entries = parse_system_use(&area).unwrap();
        let mut info = RockRidgeInfo::default();
        let mut buf = Vec::new();
        let mut done = false;
        info.absorb(&entries, &mut buf, &mut done);
        assert_eq!(info.name.as_deref(), Some("long_name.txt"));
    }

    #[test]
    fn cl_and_re_round_trip() {
        let mut area = cl_entry(321);
        area.extend_from_slice(&re_entry());
        let entries = parse_system_use(&area).unwrap();
        assert_eq!(entries[0], SuspEntry::Cl { block: 321 });
        assert_eq!(entries[1], SuspEntry::Re);
    }

    #[test]
    fn er_carries_the_extension_id() {
        let entries = parse_system_use(&er_rock_ridge_entry()).unwrap();
        assert_eq!(
            entries,
            vec![SuspEntry::Er {
                id: b"RRIP_1991A".to_vec()
            }]
        );
    }

    #[test]
    fn unknown_entries_are_tolerated() {
        let area = [b'Z', b'Q', 6, 1, 0xAA, 0xBB];
        let entries = parse_system_use(&area).unwrap();
        assert_eq!(entries, vec![SuspEntry::Unknown { sig: [b'Z', b'Q'] }]);
    }

    #[test]
    fn truncated_entries_are_rejected() {
        let area = [b'P', b'X', 36, 1, 0, 0];
        assert!(parse_system_use(&area).is_err());
    }

    #[test]
    fn symlink_components_join() {
        // "/" root + "usr" + "bin" components.
        let mut data = vec![b'S', b'L', 0, 1, 0];
        data.extend_from_slice(&[0x08, 0]); // root
        data.extend_from_slice(&[0, 3]);
        data.extend_from_slice(b"usr");
        data.extend_from_slice(&[0, 3]);
        data.extend_from_slice(b"bin");
        data[2] = data.len() as u8;
        if data.len() % 2 == 1 {
            data[2] += 1;
            data.push(0);
        }
        let entries = parse_system_use(&data).unwrap();
        match &entries[0] {
            SuspEntry::Sl { target, .. } => assert_eq!(target, "/usr/bin"),
            other => panic!("unexpected entry {other:?}"),
        }
    }
}
