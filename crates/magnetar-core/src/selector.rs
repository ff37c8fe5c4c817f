//! Choice of the file to stream when the client does not name one.

use std::cmp::Reverse;

use crate::model::SessionFile;

/// Container preference, best first.
pub const EXTENSION_PRIORITY: [&str; 7] = ["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm"];

/// Pick the best playable file.
///
/// Videos are ranked by [`EXTENSION_PRIORITY`] (unlisted extensions last), then by
/// size descending, then by index. The result does not depend on input order.
#[must_use]
pub fn select_best_file(files: &[SessionFile]) -> Option<&SessionFile> {
    files
        .iter()
        .filter(|file| file.is_video)
        .min_by_key(|file| (extension_rank(file), Reverse(file.size), file.index))
}

fn extension_rank(file: &SessionFile) -> usize {
    file.extension()
        .and_then(|ext| EXTENSION_PRIORITY.iter().position(|known| *known == ext))
        .unwrap_or(EXTENSION_PRIORITY.len())
}
