//! Integration tests for cacheprog

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Command isolated from the user's config file
    fn cacheprog(tmp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("cacheprog");
        cmd.env_remove("RUST_LOG")
            .env_remove("CACHEPROG_SECRET")
            .env_remove("CACHEPROG_DIR")
            .env("CACHEPROG_CONFIG", tmp.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        let tmp = TempDir::new().unwrap();
        cacheprog(&tmp)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Two-tier build cache proxy"));
    }

    #[test]
    fn version_displays() {
        let tmp = TempDir::new().unwrap();
        cacheprog(&tmp)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("cacheprog"));
    }

    #[test]
    fn config_path() {
        let tmp = TempDir::new().unwrap();
        cacheprog(&tmp)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let tmp = TempDir::new().unwrap();
        cacheprog(&tmp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("min_upload_size = 10000"));
    }

    #[test]
    fn config_set_then_show() {
        let tmp = TempDir::new().unwrap();
        cacheprog(&tmp)
            .args(["config", "set", "remote.gcs.bucket", "ci-cache"])
            .assert()
            .success();

        cacheprog(&tmp)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("bucket = \"ci-cache\""));
    }

    #[test]
    fn config_set_unknown_key() {
        let tmp = TempDir::new().unwrap();
        cacheprog(&tmp)
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn invalid_config_fails_with_hint() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "[cache\n").unwrap();
        cacheprog(&tmp)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("config init --force"));
    }

    #[test]
    fn unknown_subcommand() {
        let tmp = TempDir::new().unwrap();
        cacheprog(&tmp).arg("frobnicate").assert().failure();
    }

    #[test]
    fn http_remote_requires_url() {
        let tmp = TempDir::new().unwrap();
        cacheprog(&tmp)
            .args(["run", "--remote", "http", "--cache-dir"])
            .arg(tmp.path().join("cache"))
            .write_stdin("")
            .assert()
            .failure()
            .stderr(predicate::str::contains("base_url"));
    }
}

mod protocol_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use serde_json::Value;
    use tempfile::TempDir;

    const HANDSHAKE: &str = r#"{"KnownCommands":["get","put","close"]}"#;

    fn run(tmp: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("cacheprog");
        cmd.env_remove("RUST_LOG")
            .env("CACHEPROG_CONFIG", tmp.path().join("config.toml"))
            .args(["run", "--remote", "none", "--cache-dir"])
            .arg(tmp.path().join("cache"));
        cmd
    }

    fn responses(stdout: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(stdout)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn by_id(responses: &[Value], id: i64) -> &Value {
        responses.iter().find(|r| r["ID"] == id).unwrap()
    }

    #[test]
    fn handshake_on_empty_input() {
        let tmp = TempDir::new().unwrap();
        run(&tmp)
            .write_stdin("")
            .assert()
            .success()
            .stdout(predicate::str::diff(format!("{}\n", HANDSHAKE)));
    }

    #[test]
    fn put_then_get() {
        let tmp = TempDir::new().unwrap();

        let put = "{\"ID\":1,\"Command\":\"put\",\"ActionID\":\"qg==\",\"ObjectID\":\"uw==\",\"BodySize\":3}\n\"AQID\"\n";
        let output = run(&tmp).write_stdin(put).assert().success();
        let lines = responses(&output.get_output().stdout);
        assert_eq!(lines.len(), 2);
        assert!(by_id(&lines, 1).get("Err").is_none());

        let get = "{\"ID\":2,\"Command\":\"get\",\"ActionID\":\"qg==\"}\n{\"ID\":3,\"Command\":\"close\"}\n";
        let output = run(&tmp).write_stdin(get).assert().success();
        let lines = responses(&output.get_output().stdout);

        let hit = by_id(&lines, 2);
        assert_eq!(hit["OutputID"], "uw==");
        assert_eq!(hit["Size"], 3);
        assert!(hit.get("Miss").is_none());
        let disk_path = hit["DiskPath"].as_str().unwrap();
        assert!(disk_path.ends_with("o-bb"));
        assert_eq!(std::fs::read(disk_path).unwrap(), vec![1, 2, 3]);

        assert_eq!(by_id(&lines, 3).as_object().unwrap().len(), 1);
    }

    #[test]
    fn miss_and_unknown_command() {
        let tmp = TempDir::new().unwrap();
        let input = "{\"ID\":1,\"Command\":\"get\",\"ActionID\":\"3q0=\"}\n{\"ID\":2,\"Command\":\"stat\"}\n";
        let output = run(&tmp).write_stdin(input).assert().success();
        let lines = responses(&output.get_output().stdout);

        assert_eq!(by_id(&lines, 1)["Miss"], true);
        assert!(by_id(&lines, 2)["Err"]
            .as_str()
            .unwrap()
            .contains("unknown command"));
    }

    #[test]
    fn short_body_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let input = "{\"ID\":1,\"Command\":\"put\",\"ActionID\":\"qg==\",\"ObjectID\":\"uw==\",\"BodySize\":10}\n\"AQIDBAU=\"\n";
        let output = run(&tmp)
            .write_stdin(input)
            .assert()
            .failure()
            .stderr(predicate::str::contains("only got 5 bytes of declared 10"));

        let lines = responses(&output.get_output().stdout);
        assert_eq!(lines.len(), 1);
        assert!(!tmp.path().join("cache").join("a-aa").exists());
    }

    #[test]
    fn logs_stay_off_stdout() {
        let tmp = TempDir::new().unwrap();
        let output = run(&tmp)
            .arg("-vv")
            .write_stdin("{\"ID\":1,\"Command\":\"get\",\"ActionID\":\"qg==\"}\n")
            .assert()
            .success()
            .stderr(predicate::str::contains("gets: 1"));

        for line in String::from_utf8_lossy(&output.get_output().stdout).lines() {
            assert!(serde_json::from_str::<Value>(line).is_ok(), "not JSON: {}", line);
        }
    }
}
