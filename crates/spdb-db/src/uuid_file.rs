use std::fs;
use std::io;
use std::path::Path;

use tracing::info;
use uuid::Uuid;

use crate::error::{DbError, DbResult};

/// Name of the file holding a database's persistent identity.
pub const UUID_FILE: &str = "uuid";

/// Load the database uuid from `<root>/uuid`, creating it on first use.
pub fn load_or_create(root: &Path) -> DbResult<Uuid> {
    let path = root.join(UUID_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => Uuid::parse_str(text.trim()).map_err(|e| DbError::UuidFile {
            path,
            reason: e.to_string(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let uuid = Uuid::new_v4();
            fs::create_dir_all(root)?;
            fs::write(&path, uuid.hyphenated().to_string())?;
            info!(path = %path.display(), uuid = %uuid, "created database uuid");
            Ok(uuid)
        }
        Err(e) => Err(DbError::UuidFile {
            path,
            reason: e.to_string(),
        }),
    }
}
