//! Where a release artifact is published and under which name

use std::path::{Path, PathBuf};

/// Directory below a project's storage directory that receives releases
const RELEASES_DIR: &str = "releases";

/// Directory name for a project: `/`, spaces and dots become `_`
pub fn project_directory_name(project_name: &str) -> String {
    project_name
        .chars()
        .map(|c| if matches!(c, '/' | ' ' | '.') { '_' } else { c })
        .collect()
}

/// `<storage>/<project directory>/releases`
pub fn release_directory(storage: &Path, project_name: &str) -> PathBuf {
    storage
        .join(project_directory_name(project_name))
        .join(RELEASES_DIR)
}

/// `<prefix><version><postfix>`, with path separators replaced so the name stays one component
pub fn release_file_name(prefix: &str, version: &str, postfix: &str) -> String {
    format!("{}{}{}", prefix, version, postfix).replace(['/', '\\'], "_")
}
