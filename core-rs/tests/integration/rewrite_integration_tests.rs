// Rewrite integration tests
//
// Full conflict-resolution cycle against real files: load, classify,
// plan, render, commit with backup, and verify the rewrite touched
// nothing but the conflicting host ports.

use dcp_core::{
    build_plan, classify, commit, extract, render, ComposeFile, EnvironmentMap,
    OccupancyRecord, PortProbe, PortRange, Protocol,
};
use std::collections::HashSet;
use std::fs;
use tempfile::TempDir;

struct StubProbe {
    occupied: HashSet<u16>,
}

impl StubProbe {
    fn new(occupied: &[u16]) -> Self {
        StubProbe {
            occupied: occupied.iter().copied().collect(),
        }
    }
}

impl PortProbe for StubProbe {
    fn probe(&self, port: u16, _protocol: Protocol) -> OccupancyRecord {
        OccupancyRecord {
            in_use: self.occupied.contains(&port),
            process: None,
            container: None,
        }
    }
}

const COMPOSE: &str = "\
# local development stack
services:
  web:
    image: nginx:latest
    ports:
      - \"8080:80\"   # public entry point
  api:
    image: example/api:1.2
    ports:
      - \"${API_PORT}:3000\"
  db:
    image: postgres:16
    ports:
      - \"5432:5432\"
volumes:
  pgdata: {}
";

const ENV: &str = "\
# ports for the dev stack
API_PORT=9000

# unrelated settings
DB_PASSWORD=hunter2
";

#[test]
fn test_full_fix_cycle_with_backup() {
    let temp_dir = TempDir::new().unwrap();
    let compose_path = temp_dir.path().join("docker-compose.yml");
    let env_path = temp_dir.path().join(".env");
    fs::write(&compose_path, COMPOSE).unwrap();
    fs::write(&env_path, ENV).unwrap();

    let compose = ComposeFile::load(&compose_path).unwrap();
    let env = EnvironmentMap::load(&env_path).unwrap();
    let specs = extract(&compose, &env).unwrap();

    // 8080 (inline literal) and 9000 (via API_PORT) are taken
    let probe = StubProbe::new(&[8080, 9000]);
    let entries = classify(&specs, &probe);

    let range = PortRange::new(8001, 8100).unwrap();
    let plan = build_plan(&entries, &range, &probe, None);
    assert_eq!(plan.entries.len(), 2);
    assert!(plan.failures.is_empty());

    let rendered = render(&plan, compose.text(), Some(ENV)).unwrap();
    let reports = commit(&rendered, &compose_path, Some(&env_path), true);
    assert!(reports.iter().all(|r| r.succeeded()));

    // Backups hold the pre-write content
    let compose_backup = temp_dir.path().join("docker-compose.yml.backup");
    let env_backup = temp_dir.path().join(".env.backup");
    assert_eq!(fs::read_to_string(&compose_backup).unwrap(), COMPOSE);
    assert_eq!(fs::read_to_string(&env_backup).unwrap(), ENV);

    // The rewritten stack has no conflicts left
    let compose_after = ComposeFile::load(&compose_path).unwrap();
    let env_after = EnvironmentMap::load(&env_path).unwrap();
    let specs_after = extract(&compose_after, &env_after).unwrap();
    let entries_after = classify(&specs_after, &probe);
    assert!(entries_after.iter().all(|e| e.available));
}

#[test]
fn test_rewrite_fidelity_env_file() {
    let temp_dir = TempDir::new().unwrap();
    let compose_path = temp_dir.path().join("docker-compose.yml");
    let env_path = temp_dir.path().join(".env");
    fs::write(&compose_path, COMPOSE).unwrap();
    fs::write(&env_path, ENV).unwrap();

    let compose = ComposeFile::load(&compose_path).unwrap();
    let env = EnvironmentMap::load(&env_path).unwrap();
    let specs = extract(&compose, &env).unwrap();

    // Only the env-driven port conflicts
    let probe = StubProbe::new(&[9000]);
    let entries = classify(&specs, &probe);
    let range = PortRange::new(8002, 8100).unwrap();
    let plan = build_plan(&entries, &range, &probe, None);

    let rendered = render(&plan, compose.text(), Some(ENV)).unwrap();
    assert!(rendered.compose.is_none(), "compose must stay untouched");

    // Every line except API_PORT= is byte-for-byte identical
    let expected = ENV.replace("API_PORT=9000", "API_PORT=8002");
    assert_eq!(rendered.env.as_deref(), Some(expected.as_str()));
}

#[test]
fn test_rewrite_fidelity_compose_file() {
    let temp_dir = TempDir::new().unwrap();
    let compose_path = temp_dir.path().join("docker-compose.yml");
    let env_path = temp_dir.path().join(".env");
    fs::write(&compose_path, COMPOSE).unwrap();
    fs::write(&env_path, ENV).unwrap();

    let compose = ComposeFile::load(&compose_path).unwrap();
    let env = EnvironmentMap::load(&env_path).unwrap();
    let specs = extract(&compose, &env).unwrap();

    // Only the inline 8080 conflicts
    let probe = StubProbe::new(&[8080]);
    let entries = classify(&specs, &probe);
    let range = PortRange::new(8001, 8100).unwrap();
    let plan = build_plan(&entries, &range, &probe, None);

    let rendered = render(&plan, compose.text(), Some(ENV)).unwrap();
    assert!(rendered.env.is_none(), "env must stay untouched");

    // Exactly one token changes; comments, the db service's identical
    // container literal and everything else survive verbatim
    let expected = COMPOSE.replace("\"8080:80\"", "\"8001:80\"");
    assert_eq!(rendered.compose.as_deref(), Some(expected.as_str()));

    let text = rendered.compose.unwrap();
    assert!(text.contains("# public entry point"));
    assert!(text.contains("\"5432:5432\""));
    assert!(text.contains("# local development stack"));
}

#[test]
fn test_repeated_backup_overwrites_previous() {
    let temp_dir = TempDir::new().unwrap();
    let compose_path = temp_dir.path().join("docker-compose.yml");
    fs::write(&compose_path, "services: {}\n").unwrap();

    let first = dcp_core::RenderedFiles {
        compose: Some("services: {}\n# first\n".to_string()),
        env: None,
    };
    let reports = commit(&first, &compose_path, None, true);
    assert!(reports[0].succeeded());

    let second = dcp_core::RenderedFiles {
        compose: Some("services: {}\n# second\n".to_string()),
        env: None,
    };
    let reports = commit(&second, &compose_path, None, true);
    assert!(reports[0].succeeded());

    // The backup tracks the most recent pre-write state
    let backup = fs::read_to_string(temp_dir.path().join("docker-compose.yml.backup")).unwrap();
    assert_eq!(backup, "services: {}\n# first\n");
}

#[test]
fn test_plan_discarded_when_nothing_conflicts() {
    let compose = ComposeFile::from_str(COMPOSE).unwrap();
    let env = EnvironmentMap::parse(ENV);
    let specs = extract(&compose, &env).unwrap();

    let probe = StubProbe::new(&[]);
    let entries = classify(&specs, &probe);
    let range = PortRange::default();
    let plan = build_plan(&entries, &range, &probe, None);

    assert!(plan.is_empty());
    let rendered = render(&plan, compose.text(), Some(ENV)).unwrap();
    assert!(rendered.compose.is_none());
    assert!(rendered.env.is_none());
}
