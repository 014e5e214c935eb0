use spdb_types::{CodecError, DocumentCodec};

use crate::document::{DocumentRecord, MemDocument};

/// Encodes [`MemDocument`]s as pretty-printed JSON [`DocumentRecord`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl DocumentCodec<MemDocument> for JsonCodec {
    fn encode(&self, doc: &MemDocument) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec_pretty(&doc.to_record()).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<MemDocument, CodecError> {
        let record: DocumentRecord =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok(MemDocument::from_record(record))
    }
}
