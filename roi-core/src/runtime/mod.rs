use std::path::{Path, PathBuf};

#[cfg(target_os = "macos")]
const ORT_LIB: &str = "libonnxruntime.dylib";
#[cfg(target_os = "windows")]
const ORT_LIB: &str = "onnxruntime.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const ORT_LIB: &str = "libonnxruntime.so";

/// Point `ort` at an ONNX Runtime shared library before the first session is
/// built.
///
/// Lookup order:
/// 1) `ORT_DYLIB_PATH`, if it names an existing file
/// 2) `models/onnxruntime*/lib/` and `models/` under the cwd or any of the
///    executable's ancestors
/// 3) well-known system library directories
///
/// Finding nothing is not an error here; `ort` reports it when the detector
/// loads.
pub fn configure_ort_dylib() {
    if let Some(existing) = std::env::var_os("ORT_DYLIB_PATH") {
        let existing_path = PathBuf::from(existing);
        if existing_path.is_file() {
            tracing::info!(
                path = %existing_path.display(),
                "using ORT_DYLIB_PATH from environment"
            );
            return;
        }
        tracing::warn!(
            path = %existing_path.display(),
            "ORT_DYLIB_PATH does not name a file; searching for {ORT_LIB}"
        );
    }

    match ort_candidates().into_iter().find(|c| c.is_file()) {
        Some(candidate) => {
            // SAFETY: runs on the main thread during startup, before the
            // detector (and any other thread) exists.
            unsafe {
                std::env::set_var("ORT_DYLIB_PATH", &candidate);
            }
            tracing::info!(path = %candidate.display(), "configured ORT_DYLIB_PATH");
        }
        None => tracing::warn!(
            "could not locate {ORT_LIB}; set ORT_DYLIB_PATH to an ONNX Runtime build"
        ),
    }
}

fn ort_candidates() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }

    if let Ok(exe) = std::env::current_exe() {
        roots.extend(exe.ancestors().skip(1).take(7).map(Path::to_path_buf));
    }

    let mut candidates = Vec::new();
    for root in &roots {
        candidates.extend(local_candidates(root));
    }

    for dir in system_dirs() {
        candidates.push(Path::new(dir).join(ORT_LIB));
    }
    candidates
}

fn local_candidates(root: &Path) -> Vec<PathBuf> {
    let models = root.join("models");
    let mut found = vec![models.join("onnxruntime/lib").join(ORT_LIB)];

    // Release archives unpack as e.g. `onnxruntime-linux-x64-1.20.1/`.
    if let Ok(entries) = std::fs::read_dir(&models) {
        let mut versioned: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("onnxruntime-"))
            })
            .map(|p| p.join("lib").join(ORT_LIB))
            .collect();
        versioned.sort();
        found.extend(versioned);
    }

    found.push(models.join(ORT_LIB));
    found
}

fn system_dirs() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &["/opt/homebrew/lib", "/usr/local/lib"]
    } else if cfg!(target_os = "windows") {
        &[]
    } else {
        &["/usr/local/lib", "/usr/lib", "/usr/lib/x86_64-linux-gnu"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_versioned_release_directory() {
        let dir = tempfile::tempdir().unwrap();
        let lib_dir = dir.path().join("models/onnxruntime-linux-x64-1.20.1/lib");
        std::fs::create_dir_all(&lib_dir).unwrap();
        std::fs::write(lib_dir.join(ORT_LIB), b"").unwrap();

        let candidates = local_candidates(dir.path());
        let hit = candidates.iter().find(|c| c.is_file()).unwrap();
        assert_eq!(hit, &lib_dir.join(ORT_LIB));
    }

    #[test]
    fn plain_layout_comes_first() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = local_candidates(dir.path());
        assert_eq!(
            candidates.first().unwrap(),
            &dir.path().join("models/onnxruntime/lib").join(ORT_LIB)
        );
        assert_eq!(candidates.last().unwrap(), &dir.path().join("models").join(ORT_LIB));
    }
}
