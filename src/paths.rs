//! Layout of a ComfyUI installation root.

use crate::model::{PathValidation, PythonLayout};
use std::path::{Path, PathBuf};

/// Interpreter locations in priority order.
const INTERPRETERS: [(PythonLayout, &str, &str); 2] = [
    (PythonLayout::Embeded, "python_embeded", "python.exe"),
    (PythonLayout::Standalone, "python_standalone", "python.exe"),
];

const INTERPRETER_REQUIREMENT: &str = "python_embeded/python.exe or python_standalone/python.exe";
const ENTRY_SCRIPT_NAME: &str = "ComfyUI/main.py";

pub fn entry_script(root: &Path) -> PathBuf {
    root.join("ComfyUI").join("main.py")
}

pub fn requirements_file(root: &Path) -> PathBuf {
    root.join("ComfyUI").join("requirements.txt")
}

pub fn hf_cache_dir(root: &Path) -> PathBuf {
    root.join("HuggingFaceHub")
}

pub fn torch_home_dir(root: &Path) -> PathBuf {
    root.join("TorchHome")
}

/// First interpreter found under `root`, if any.
pub fn find_interpreter(root: &Path) -> Option<(PythonLayout, PathBuf)> {
    INTERPRETERS.iter().find_map(|(layout, dir, exe)| {
        let candidate = root.join(dir).join(exe);
        candidate.is_file().then_some((*layout, candidate))
    })
}

/// Check that `root` looks like a usable installation. Filesystem existence only.
pub fn validate(root: &Path) -> PathValidation {
    let mut missing = Vec::new();

    let interpreter = find_interpreter(root);
    if interpreter.is_none() {
        missing.push(INTERPRETER_REQUIREMENT.to_string());
    }
    if !entry_script(root).is_file() {
        missing.push(ENTRY_SCRIPT_NAME.to_string());
    }

    PathValidation {
        valid: missing.is_empty(),
        missing,
        python_type: interpreter.as_ref().map(|(layout, _)| *layout),
        python_path: interpreter.map(|(_, p)| p.to_string_lossy().into_owned()),
    }
}
