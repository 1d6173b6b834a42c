use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use bincode::{Decode, Encode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blockdir::BlkDirRow;
use crate::error::{Error, Result};
use crate::segfiles::SegFileRow;
use crate::storage::heap::CatalogHeap;
use crate::txn::TransactionManager;
use crate::types::{Orientation, RelId};

const CATALOG_VERSION: u32 = 2;
const FIRST_RELID: RelId = 16384;

/// An append-only relation known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct AoRelation {
    pub relid: RelId,
    pub name: String,
    pub orientation: Orientation,
    pub num_columns: u32,
    /// Whether a block directory is maintained for this relation
    pub has_block_directory: bool,
}

impl AoRelation {
    /// Column groups the block directory tracks: one for row tables,
    /// one per column otherwise
    pub fn num_column_groups(&self) -> usize {
        match self.orientation {
            Orientation::Row => 1,
            Orientation::Column => self.num_columns as usize,
        }
    }

    pub fn is_column_oriented(&self) -> bool {
        self.orientation == Orientation::Column
    }
}

/// Checkpoint slot header
#[derive(Debug, Clone, Encode, Decode)]
struct CatalogHeader {
    version: u32,
    generation: u64,
    payload_len: u64,
    checksum: u32,
}

/// Committed catalog contents as written by a checkpoint
#[derive(Debug, Clone, Default, Encode, Decode)]
struct CatalogImage {
    next_relid: RelId,
    relations: Vec<AoRelation>,
    segfiles: Vec<SegFileRow>,
    blkdir: Vec<BlkDirRow>,
}

/// Relation registry plus the segment-file and block-directory catalog heaps.
/// Persisted with dual-slot atomic writes.
pub struct Catalog {
    dir: PathBuf,
    /// Slot (0 or 1) holding the newest checkpoint
    active_slot: AtomicU8,
    generation: AtomicU64,
    next_relid: AtomicU32,
    relations: RwLock<HashMap<RelId, AoRelation>>,
    pub(crate) segfiles: RwLock<CatalogHeap<SegFileRow>>,
    pub(crate) blkdir: RwLock<CatalogHeap<BlkDirRow>>,
}

impl Catalog {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Catalog {
            dir: dir.as_ref().to_path_buf(),
            active_slot: AtomicU8::new(1),
            generation: AtomicU64::new(0),
            next_relid: AtomicU32::new(FIRST_RELID),
            relations: RwLock::new(HashMap::new()),
            segfiles: RwLock::new(CatalogHeap::new("segfiles")),
            blkdir: RwLock::new(CatalogHeap::new("blkdir")),
        }
    }

    /// Load the newest valid checkpoint from `dir`, or start empty
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut best: Option<(u8, CatalogHeader, CatalogImage)> = None;
        let mut found_any = false;

        for slot in 0..2u8 {
            let path = slot_path(dir, slot);
            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            found_any = true;
            match deserialize(&data) {
                Ok((header, image)) => {
                    let newer = best.as_ref().is_none_or(|(_, h, _)| header.generation > h.generation);
                    if newer {
                        best = Some((slot, header, image));
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable catalog slot"),
            }
        }

        let catalog = Catalog::new(dir);
        let Some((slot, header, image)) = best else {
            if found_any {
                return Err(Error::Codec("no readable catalog slot".to_string()));
            }
            debug!(dir = %dir.display(), "no catalog found, starting empty");
            return Ok(catalog);
        };

        catalog.active_slot.store(slot, Ordering::SeqCst);
        catalog.generation.store(header.generation, Ordering::SeqCst);
        catalog.next_relid.store(image.next_relid.max(FIRST_RELID), Ordering::SeqCst);
        {
            let mut relations = catalog.relations.write();
            for rel in image.relations {
                relations.insert(rel.relid, rel);
            }
        }
        *catalog.segfiles.write() = CatalogHeap::from_rows("segfiles", image.segfiles);
        *catalog.blkdir.write() = CatalogHeap::from_rows("blkdir", image.blkdir);

        info!(
            slot,
            generation = header.generation,
            relations = catalog.relations.read().len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Write committed catalog state into the inactive slot and flip to it
    pub fn checkpoint(&self, mgr: &TransactionManager) -> Result<()> {
        let image = CatalogImage {
            next_relid: self.next_relid.load(Ordering::SeqCst),
            relations: {
                let mut rels: Vec<_> = self.relations.read().values().cloned().collect();
                rels.sort_by_key(|r| r.relid);
                rels
            },
            segfiles: self.segfiles.read().committed_rows(mgr),
            blkdir: self.blkdir.read().committed_rows(mgr),
        };
        let generation = self.generation.load(Ordering::SeqCst) + 1;
        let data = serialize(&image, generation)?;

        let slot = self.inactive_slot();
        let final_path = slot_path(&self.dir, slot);
        let temp_path = final_path.with_extension("tmp");
        {
            let mut temp_file = fs::File::create(&temp_path)?;
            temp_file.write_all(&data)?;
            temp_file.sync_all()?;
        }
        fs::rename(&temp_path, &final_path)?;

        self.generation.store(generation, Ordering::SeqCst);
        self.active_slot.store(slot, Ordering::SeqCst);
        debug!(
            slot,
            generation,
            segfiles = image.segfiles.len(),
            minipages = image.blkdir.len(),
            "catalog checkpoint written"
        );
        Ok(())
    }

    /// Drop catalog row versions no running transaction can see
    pub fn prune(&self, mgr: &TransactionManager) -> (usize, usize) {
        let segfiles = self.segfiles.write().prune(mgr);
        let blkdir = self.blkdir.write().prune(mgr);
        debug!(segfiles, minipages = blkdir, "catalog versions pruned");
        (segfiles, blkdir)
    }

    /// Row versions held in memory by the segment-file and block-directory
    /// heaps, dead ones included
    pub fn version_counts(&self) -> (usize, usize) {
        (self.segfiles.read().version_count(), self.blkdir.read().version_count())
    }

    pub fn active_slot(&self) -> u8 {
        self.active_slot.load(Ordering::SeqCst)
    }

    pub fn inactive_slot(&self) -> u8 {
        1 - self.active_slot()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Register a new relation
    pub fn add_relation(
        &self,
        name: &str,
        orientation: Orientation,
        num_columns: u32,
        has_block_directory: bool,
    ) -> Result<AoRelation> {
        if num_columns == 0 {
            return Err(Error::Configuration(format!(
                "relation \"{}\" must have at least one column",
                name
            )));
        }
        let mut relations = self.relations.write();
        if relations.values().any(|r| r.name == name) {
            return Err(Error::Configuration(format!("relation \"{}\" already exists", name)));
        }
        let rel = AoRelation {
            relid: self.next_relid.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            orientation,
            num_columns,
            has_block_directory,
        };
        relations.insert(rel.relid, rel.clone());
        debug!(relid = rel.relid, name, ?orientation, num_columns, "relation added");
        Ok(rel)
    }

    pub fn relation(&self, relid: RelId) -> Option<AoRelation> {
        self.relations.read().get(&relid).cloned()
    }

    pub fn relation_by_name(&self, name: &str) -> Option<AoRelation> {
        self.relations.read().values().find(|r| r.name == name).cloned()
    }

    /// Every relation ordered by id
    pub fn relations(&self) -> Vec<AoRelation> {
        let mut rels: Vec<_> = self.relations.read().values().cloned().collect();
        rels.sort_by_key(|r| r.relid);
        rels
    }

    pub fn remove_relation(&self, relid: RelId) -> Option<AoRelation> {
        self.relations.write().remove(&relid)
    }
}

fn slot_path(dir: &Path, slot: u8) -> PathBuf {
    dir.join(format!("catalog_{}.db", slot))
}

fn serialize(image: &CatalogImage, generation: u64) -> Result<Vec<u8>> {
    let payload = bincode::encode_to_vec(image, bincode::config::standard())?;
    let header = CatalogHeader {
        version: CATALOG_VERSION,
        generation,
        payload_len: payload.len() as u64,
        checksum: crc32fast::hash(&payload),
    };
    let mut result = bincode::encode_to_vec(&header, bincode::config::standard())?;
    result.extend_from_slice(&payload);
    Ok(result)
}

fn deserialize(data: &[u8]) -> Result<(CatalogHeader, CatalogImage)> {
    let (header, bytes_read): (CatalogHeader, usize) =
        bincode::decode_from_slice(data, bincode::config::standard())?;
    if header.version > CATALOG_VERSION {
        return Err(Error::Codec(format!(
            "catalog version {} is newer than supported version {}",
            header.version, CATALOG_VERSION
        )));
    }

    let payload = &data[bytes_read..];
    if payload.len() as u64 != header.payload_len {
        return Err(Error::Codec(format!(
            "catalog payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len
        )));
    }
    let checksum = crc32fast::hash(payload);
    if checksum != header.checksum {
        return Err(Error::Codec(format!(
            "catalog checksum mismatch: expected {}, got {}",
            header.checksum, checksum
        )));
    }

    let (image, _): (CatalogImage, usize) =
        bincode::decode_from_slice(payload, bincode::config::standard())?;
    Ok((header, image))
}
