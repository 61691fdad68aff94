use crate::model::{LaunchConfig, DEFAULT_LISTEN, DEFAULT_PORT, FLAG_SWITCHES};
use crate::paths;
use std::path::{Path, PathBuf};

/// Everything needed to spawn the server, derived from a config snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Overlaid on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

pub fn build_launch_plan(cfg: &LaunchConfig, interpreter: &Path) -> LaunchPlan {
    let root = Path::new(&cfg.comfyui_path);
    LaunchPlan {
        program: interpreter.to_path_buf(),
        args: build_args(cfg, &paths::entry_script(root)),
        env: build_env_overlay(cfg, root),
        cwd: root.to_path_buf(),
    }
}

pub fn build_args(cfg: &LaunchConfig, entry_script: &Path) -> Vec<String> {
    let mut args = vec![
        "-s".to_string(),
        entry_script.to_string_lossy().into_owned(),
        "--windows-standalone-build".to_string(),
    ];

    for (key, switch) in FLAG_SWITCHES {
        if cfg.flag(key) {
            args.push(switch.to_string());
        }
    }

    if cfg.port != DEFAULT_PORT {
        args.push("--port".into());
        args.push(cfg.port.clone());
    }
    if cfg.listen != DEFAULT_LISTEN {
        args.push("--listen".into());
        args.push(cfg.listen.clone());
    }

    args.extend(cfg.extra_args.split_whitespace().map(str::to_string));
    args
}

pub fn build_env_overlay(cfg: &LaunchConfig, root: &Path) -> Vec<(String, String)> {
    let optional = [
        ("HTTP_PROXY", &cfg.http_proxy),
        ("HTTPS_PROXY", &cfg.https_proxy),
        ("HF_TOKEN", &cfg.hf_token),
        ("PIP_INDEX_URL", &cfg.pip_index_url),
        ("HF_ENDPOINT", &cfg.hf_endpoint),
    ];

    let mut env: Vec<(String, String)> = optional
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();

    env.push((
        "HF_HUB_CACHE".into(),
        paths::hf_cache_dir(root).to_string_lossy().into_owned(),
    ));
    env.push((
        "TORCH_HOME".into(),
        paths::torch_home_dir(root).to_string_lossy().into_owned(),
    ));
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: usize = 3;

    fn cfg() -> LaunchConfig {
        LaunchConfig {
            comfyui_path: "/opt/comfy".into(),
            ..Default::default()
        }
    }

    fn args_of(cfg: &LaunchConfig) -> Vec<String> {
        build_args(cfg, Path::new("/opt/comfy/ComfyUI/main.py"))
    }

    #[test]
    fn defaults_produce_only_the_fixed_prefix() {
        assert_eq!(
            args_of(&cfg()),
            vec!["-s", "/opt/comfy/ComfyUI/main.py", "--windows-standalone-build"]
        );
    }

    #[test]
    fn lowvram_alone_appends_exactly_one_flag() {
        let c = LaunchConfig {
            lowvram: true,
            ..cfg()
        };
        let args = args_of(&c);
        assert_eq!(args.len(), PREFIX + 1);
        assert_eq!(args.last().map(String::as_str), Some("--lowvram"));
    }

    #[test]
    fn flags_follow_the_fixed_order() {
        let mut c = cfg();
        c.disable_auto_launch = true;
        c.cpu_mode = true;
        c.lowvram = true;
        c.fast_mode = true;
        assert_eq!(
            &args_of(&c)[PREFIX..],
            &["--lowvram", "--fast", "--cpu", "--disable-auto-launch"]
        );
    }

    #[test]
    fn non_default_port_adds_port_only() {
        let c = LaunchConfig {
            port: "9000".into(),
            ..cfg()
        };
        let args = args_of(&c);
        assert_eq!(&args[PREFIX..], &["--port", "9000"]);
        assert!(!args.iter().any(|a| a == "--listen"));
    }

    #[test]
    fn port_listen_then_extra_tokens() {
        let c = LaunchConfig {
            port: "9000".into(),
            listen: "0.0.0.0".into(),
            extra_args: "  --preview-method   auto ".into(),
            directml: true,
            ..cfg()
        };
        assert_eq!(
            &args_of(&c)[PREFIX..],
            &[
                "--directml",
                "--port",
                "9000",
                "--listen",
                "0.0.0.0",
                "--preview-method",
                "auto"
            ]
        );
    }

    #[test]
    fn env_overlay_skips_empty_values() {
        let c = LaunchConfig {
            https_proxy: "http://proxy:3128".into(),
            hf_endpoint: "https://hf-mirror.example".into(),
            ..cfg()
        };
        let env = build_env_overlay(&c, Path::new("/opt/comfy"));
        let keys: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["HTTPS_PROXY", "HF_ENDPOINT", "HF_HUB_CACHE", "TORCH_HOME"]
        );
    }

    #[test]
    fn cache_dirs_are_always_set_under_the_root() {
        let env = build_env_overlay(&cfg(), Path::new("/opt/comfy"));
        let get = |k: &str| env.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(
            get("HF_HUB_CACHE").map(PathBuf::from),
            Some(PathBuf::from("/opt/comfy/HuggingFaceHub"))
        );
        assert_eq!(
            get("TORCH_HOME").map(PathBuf::from),
            Some(PathBuf::from("/opt/comfy/TorchHome"))
        );
        assert!(get("HF_TOKEN").is_none());
    }

    #[test]
    fn plan_runs_from_the_root() {
        let plan = build_launch_plan(&cfg(), Path::new("/opt/comfy/python_embeded/python.exe"));
        assert_eq!(plan.cwd, PathBuf::from("/opt/comfy"));
        assert_eq!(
            plan.program,
            PathBuf::from("/opt/comfy/python_embeded/python.exe")
        );
        assert_eq!(plan.args[0], "-s");
    }
}
