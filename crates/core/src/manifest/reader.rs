//! Reading manifest files back into entries

use apache_avro::Reader;

use super::{ManifestEntry, ManifestFile, UNASSIGNED_SEQUENCE_NUMBER};
use crate::errors::FloeResult;
use crate::storage::FileIo;

/// Read all entries of a manifest.
///
/// Entries written without a snapshot id or sequence number inherit them from
/// the containing manifest, so callers always observe fully resolved entries.
pub async fn read_manifest(io: &FileIo, manifest: &ManifestFile) -> FloeResult<Vec<ManifestEntry>> {
    let data = io.get(&manifest.manifest_path).await?;
    let reader = Reader::new(data.as_ref())?;

    let inherited_sequence = (manifest.sequence_number != UNASSIGNED_SEQUENCE_NUMBER)
        .then_some(manifest.sequence_number);

    let mut entries = Vec::new();
    for value in reader {
        let mut entry: ManifestEntry = apache_avro::from_value(&value?)?;
        entry.snapshot_id = entry.snapshot_id.or(manifest.added_snapshot_id);
        entry.sequence_number = entry.sequence_number.or(inherited_sequence);
        entries.push(entry);
    }
    Ok(entries)
}
