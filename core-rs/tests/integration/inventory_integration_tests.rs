// Inventory integration tests
//
// Full extract -> classify -> report pipeline over realistic compose and
// env fixtures, driven by a deterministic stub probe.

use dcp_core::{
    classify, extract, referenced_variables, report, summarize, ComposeFile, DcpError,
    EnvironmentInfo, EnvironmentMap, OccupancyRecord, PortProbe, ProcessInfo, Protocol,
};
use std::collections::HashSet;

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
            process: self.occupied.contains(&port).then(|| ProcessInfo {
                pid: 1000 + u32::from(port % 100),
                name: Some("listener".to_string()),
            }),
            container: None,
        }
    }
}

const STACK: &str = "\
services:
  web:
    image: nginx:latest
    ports:
      - \"${WEB_PORT:-8080}:80\"
      - \"8443:443\"
  api:
    image: registry.example.com/api:2.4
    ports:
      - \"${API_PORT}:3000\"
  dns:
    image: coredns/coredns:1.11
    ports:
      - \"5353:53/udp\"
      - \"5353:53/tcp\"
  worker:
    image: registry.example.com/worker:2.4
";

const ENV: &str = "# service ports\nAPI_PORT=9000\nWEB_PORT=8080\nUNRELATED=value\n";

#[test]
fn test_pipeline_produces_canonical_order() {
    let compose = ComposeFile::from_str(STACK).unwrap();
    let env = EnvironmentMap::parse(ENV);
    let specs = extract(&compose, &env).unwrap();
    let probe = StubProbe::new(&[]);
    let entries = classify(&specs, &probe);

    // Service declaration order, then port-list order
    let order: Vec<(&str, u16)> = entries
        .iter()
        .map(|e| (e.binding.service.as_str(), e.binding.host_port))
        .collect();
    assert_eq!(
        order,
        vec![
            ("web", 8080),
            ("web", 8443),
            ("api", 9000),
            ("dns", 5353),
            ("dns", 5353),
        ]
    );
}

#[test]
fn test_pipeline_resolves_variables_and_defaults() {
    let compose = ComposeFile::from_str(STACK).unwrap();
    let env = EnvironmentMap::parse(ENV);
    let specs = extract(&compose, &env).unwrap();

    let web = &specs[0].bindings[0];
    assert_eq!(web.host_port, 8080);
    assert_eq!(web.source_variable.as_deref(), Some("WEB_PORT"));

    let api = &specs[1].bindings[0];
    assert_eq!(api.host_port, 9000);
    assert_eq!(api.source_variable.as_deref(), Some("API_PORT"));
}

#[test]
fn test_pipeline_missing_variable_aborts_whole_run() {
    let compose = ComposeFile::from_str(STACK).unwrap();
    // API_PORT has no default, so an empty map is a hard error
    let result = extract(&compose, &EnvironmentMap::default());
    assert!(matches!(result, Err(DcpError::UnresolvedVariable(_))));
}

#[test]
fn test_summary_counts_with_occupied_ports() {
    let compose = ComposeFile::from_str(STACK).unwrap();
    let env = EnvironmentMap::parse(ENV);
    let specs = extract(&compose, &env).unwrap();
    let probe = StubProbe::new(&[8080, 9000]);
    let entries = classify(&specs, &probe);

    let summary = summarize(&specs, &entries);
    assert_eq!(summary.total_services, 4);
    assert_eq!(summary.total_ports, 5);
    assert_eq!(summary.ports_in_use, 2);
}

#[test]
fn test_udp_and_tcp_share_number_without_duplicate_flag() {
    let compose = ComposeFile::from_str(STACK).unwrap();
    let env = EnvironmentMap::parse(ENV);
    let specs = extract(&compose, &env).unwrap();
    let entries = classify(&specs, &StubProbe::new(&[]));

    let dns: Vec<_> = entries
        .iter()
        .filter(|e| e.binding.service == "dns")
        .collect();
    assert_eq!(dns.len(), 2);
    assert!(dns.iter().all(|e| !e.declared_duplicate));
}

#[test]
fn test_declared_duplicates_flagged_across_services() {
    let text = "\
services:
  first:
    ports:
      - \"8080:80\"
  second:
    ports:
      - \"8080:81\"
  third:
    ports:
      - \"8081:82\"
";
    let compose = ComposeFile::from_str(text).unwrap();
    let specs = extract(&compose, &EnvironmentMap::default()).unwrap();
    let entries = classify(&specs, &StubProbe::new(&[]));

    assert!(entries[0].declared_duplicate);
    assert!(entries[1].declared_duplicate);
    assert!(!entries[2].declared_duplicate);
    // The OS says they are free; the duplicate flag is independent
    assert!(entries.iter().all(|e| e.available));
}

#[test]
fn test_json_and_human_reports_carry_same_information() {
    colored::control::set_override(false);

    let compose = ComposeFile::from_str(STACK).unwrap();
    let env = EnvironmentMap::parse(ENV);
    let specs = extract(&compose, &env).unwrap();
    let probe = StubProbe::new(&[9000]);
    let entries = classify(&specs, &probe);

    let vars: Vec<String> = referenced_variables(&compose)
        .unwrap()
        .into_iter()
        .collect();
    let info = EnvironmentInfo {
        env_file_path: None,
        detected: vars,
        loaded: env.len(),
    };

    let json: serde_json::Value =
        serde_json::from_str(&report::render_json(&specs, &entries, &info).unwrap()).unwrap();
    let human = report::render_human(&specs, &entries, &info);

    // Same summary
    assert_eq!(json["summary"]["ports_in_use"], 1);
    assert!(human.contains("1 port(s) in use"));

    // Same occupied binding, including the env indirection
    let api_port = &json["services"][1]["ports"][0];
    assert_eq!(api_port["host_port"], 9000);
    assert_eq!(api_port["available"], false);
    assert_eq!(api_port["env_var"], "API_PORT");
    assert!(human.contains("9000:3000/tcp (${API_PORT}) - IN USE"));

    // Environment block matches the detection set
    assert_eq!(json["environment"]["uses_env_vars"], true);
    assert_eq!(
        json["environment"]["env_vars_detected"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn test_service_without_ports_still_reported() {
    let compose = ComposeFile::from_str(STACK).unwrap();
    let env = EnvironmentMap::parse(ENV);
    let specs = extract(&compose, &env).unwrap();
    let entries = classify(&specs, &StubProbe::new(&[]));

    let json: serde_json::Value = serde_json::from_str(
        &report::render_json(&specs, &entries, &EnvironmentInfo::default()).unwrap(),
    )
    .unwrap();

    let services = json["services"].as_array().unwrap();
    assert_eq!(services.len(), 4);
    assert_eq!(services[3]["name"], "worker");
    assert!(services[3]["ports"].as_array().unwrap().is_empty());
}
