use std::{env, fs, path::PathBuf, process::Command};

fn run_bin(args: &[&str]) {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_gridsim"));

    let output = Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command");

    let stdout_str =
        std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
    let stderr_str =
        std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

    assert!(
        output.status.success(),
        "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
    );
}

fn workflow(name: &str, config_contents: &str) {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    fs::write(test_dir.join("config.toml"), config_contents).expect("failed to write config file");

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    run_bin(&["--sim-dir", test_dir_str, "create"]);
    run_bin(&["--sim-dir", test_dir_str, "create"]);

    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]);
    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]);

    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "1"]);

    run_bin(&["--sim-dir", test_dir_str, "analyze"]);

    for run in ["run-0000", "run-0001"] {
        let run_dir = test_dir.join(run);
        assert!(run_dir.join("checkpoint.msgpack").is_file());
        assert!(run_dir.join("trajectory-0000.msgpack").is_file());

        let stats = fs::read_to_string(run_dir.join("stats.csv")).expect("failed to read stats");
        assert!(stats.starts_with("step,"), "{stats}");
        assert!(stats.lines().count() >= 2, "{stats}");

        let summary =
            fs::read_to_string(run_dir.join("summary.toml")).expect("failed to read summary");
        assert!(summary.contains("mean"), "{summary}");
    }

    run_bin(&["--sim-dir", test_dir_str, "clean"]);

    assert!(!test_dir.join("run-0000").exists());
    assert!(!test_dir.join("run-0001").exists());
    assert!(test_dir.join("config.toml").is_file());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn epidemic_workflow() {
    let config_contents = String::new()
        + "seed = 7\n"
        + "\n"
        + "[grid]\n"
        + "width = 20\n"
        + "height = 20\n"
        + "topology = \"toroidal\"\n"
        + "\n"
        + "[model.epidemic]\n"
        + "num_agents = 60\n"
        + "initial_infected_chance = 0.2\n"
        + "infection_radius = 2\n"
        + "infection_kernel = { kind = \"inverse_square\", base = 0.3 }\n"
        + "infection_end = { kind = \"erlang\", shape = 3, scale = 4.0 }\n"
        + "mortality_rate = 0.05\n"
        + "immunity = { kind = \"waning\", end = { kind = \"countdown\", steps = 30 } }\n"
        + "vaccination_start = 20\n"
        + "general_vaccination_rate = 0.01\n"
        + "newborn_vaccination_rate = 0.5\n"
        + "movement = { kind = \"gaussian\", mean = 2.0, sd = 1.0 }\n"
        + "population_birth_rate = 0.5\n"
        + "population_death_rate = 0.2\n"
        + "steps_per_year = 100\n"
        + "external_infection = { chance = 0.05, interval = 10 }\n"
        + "\n"
        + "[output]\n"
        + "max_iterations = 150\n"
        + "sample_every = 5\n"
        + "steps_per_file = 50\n";

    workflow("epidemic_workflow", &config_contents);
}

#[test]
fn segregation_workflow() {
    let config_contents = String::new()
        + "seed = 3\n"
        + "\n"
        + "[grid]\n"
        + "width = 16\n"
        + "height = 16\n"
        + "topology = \"bounded\"\n"
        + "\n"
        + "[model.segregation]\n"
        + "empty_fraction = 0.2\n"
        + "type_distribution = [0.5, 0.5]\n"
        + "compatibility = [[1.0, -1.0], [-1.0, 1.0]]\n"
        + "neighbour_amount = 0.3\n"
        + "movement = \"targeted\"\n"
        + "\n"
        + "[output]\n"
        + "max_iterations = 60\n"
        + "sample_every = 1\n"
        + "steps_per_file = 20\n";

    workflow("segregation_workflow", &config_contents);
}

#[test]
fn rejects_invalid_config() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("rejects_invalid_config");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_contents = String::new()
        + "[grid]\n"
        + "width = 0\n"
        + "height = 16\n"
        + "topology = \"bounded\"\n"
        + "\n"
        + "[model.segregation]\n"
        + "empty_fraction = 0.2\n"
        + "type_distribution = [0.5, 0.5]\n"
        + "compatibility = [[1.0, 0.0], [0.0, 1.0]]\n"
        + "neighbour_amount = 0.3\n"
        + "movement = \"random\"\n"
        + "\n"
        + "[output]\n"
        + "max_iterations = 60\n"
        + "sample_every = 1\n"
        + "steps_per_file = 20\n";
    fs::write(test_dir.join("config.toml"), config_contents).expect("failed to write config file");

    let output = Command::new(env!("CARGO_BIN_EXE_gridsim"))
        .args(["--sim-dir", test_dir.to_str().expect("non UTF-8 path"), "create"])
        .output()
        .expect("failed to execute command");
    assert_eq!(output.status.code(), Some(1));
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}
