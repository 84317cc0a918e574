//! Checkpoint id：(query, frame, 去重后条目 id 列表) 的确定性哈希

use sha2::{Digest, Sha256};

use crate::core::{Frame, OrchestratorError};

const SEPARATOR: &[u8] = &[0x1f];

/// `ckpt_` + sha256 前 24 位十六进制；相同输入恒得相同 id
pub fn checkpoint_id(query: &str, frame: &Frame, item_ids: &[String]) -> Result<String, OrchestratorError> {
    let frame_json = serde_json::to_vec(frame)
        .map_err(|e| OrchestratorError::Synthesis(format!("frame serialization failed: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(&frame_json);
    for id in item_ids {
        hasher.update(SEPARATOR);
        hasher.update(id.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    Ok(format!("ckpt_{}", &digest[..24]))
}
