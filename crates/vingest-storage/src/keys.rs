//! Object key layout.
//!
//! ```text
//! sessions/{id}/original/{name}
//! sessions/{id}/chunks/{index:05}
//! sessions/{id}/segments/segment_{index:03}.{ext}
//! ```

use vingest_models::SessionId;

/// Prefix under which every artifact of a session lives.
pub fn session_prefix(session_id: &SessionId) -> String {
    format!("sessions/{}/", session_id)
}

/// Key of the whole source file.
pub fn original_key(session_id: &SessionId, source_name: &str) -> String {
    format!(
        "sessions/{}/original/{}",
        session_id,
        sanitize_file_name(source_name)
    )
}

/// Key of one client upload chunk.
pub fn chunk_key(session_id: &SessionId, index: u32) -> String {
    format!("sessions/{}/chunks/{:05}", session_id, index)
}

/// Key of one produced segment.
pub fn segment_key(session_id: &SessionId, index: u32, extension: &str) -> String {
    format!(
        "sessions/{}/segments/segment_{:03}.{}",
        session_id, index, extension
    )
}

/// Container extension of a source name, lowercased, defaulting to `mp4`.
pub fn container_extension(source_name: &str) -> String {
    std::path::Path::new(source_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".to_string())
}

/// Content type for a media file name.
pub fn content_type_for(name: &str) -> &'static str {
    match container_extension(name).as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "ts" => "video/mp2t",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// Keep a client-supplied name safe for use as the last key component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "source".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = SessionId::from_string("abc");
        assert_eq!(session_prefix(&id), "sessions/abc/");
        assert_eq!(original_key(&id, "a.mp4"), "sessions/abc/original/a.mp4");
        assert_eq!(chunk_key(&id, 7), "sessions/abc/chunks/00007");
        assert_eq!(segment_key(&id, 2, "mp4"), "sessions/abc/segments/segment_002.mp4");
    }

    #[test]
    fn test_segment_keys_sort_by_index() {
        let id = SessionId::from_string("s");
        let mut keys: Vec<String> = (0..12).rev().map(|i| segment_key(&id, i, "mp4")).collect();
        keys.sort();
        assert_eq!(keys[0], segment_key(&id, 0, "mp4"));
        assert_eq!(keys[11], segment_key(&id, 11, "mp4"));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("my video (1).mp4"), "my_video__1_.mp4");
        assert_eq!(sanitize_file_name("..."), "source");
        assert_eq!(sanitize_file_name("C:\\clips\\a.mov"), "a.mov");
    }

    #[test]
    fn test_container_extension() {
        assert_eq!(container_extension("A.MOV"), "mov");
        assert_eq!(container_extension("noext"), "mp4");
        assert_eq!(content_type_for("x.webm"), "video/webm");
        assert_eq!(content_type_for("x.bin"), "application/octet-stream");
    }
}
