//! Pure text parsers for the discovery probes.
//!
//! Every parser here is best-effort: malformed lines are skipped, never
//! surfaced. The probes feed these from raw remote command output.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use devhost_protocol::{
    ContainerEntry, ListeningSocket, OsIdentity, ProcessManagerEntry, ProjectRoot, ProxySite,
    ServiceUnit,
};

/// Parse `/etc/os-release` concatenated with `uname -sr` output.
pub fn parse_os_identity(text: &str) -> OsIdentity {
    let mut os = OsIdentity::default();
    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("NAME=") {
            os.name = value.trim_matches('"').to_string();
        } else if let Some(value) = line.strip_prefix("VERSION=") {
            os.version = value.trim_matches('"').to_string();
        } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
            if os.version.is_empty() {
                os.version = value.trim_matches('"').to_string();
            }
        } else if !line.contains('=') && !line.is_empty() {
            // The trailing uname line: "Linux 6.8.0-41-generic".
            os.kernel = line.to_string();
        }
    }
    os
}

/// Parse `docker ps` output in the tab-separated
/// `ID\tNames\tImage\tStatus\tPorts` format.
pub fn parse_container_listing(text: &str) -> Vec<ContainerEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let id = fields.next()?.trim();
            let name = fields.next()?.trim();
            let image = fields.next()?.trim();
            if id.is_empty() || name.is_empty() {
                return None;
            }
            Some(ContainerEntry {
                id: id.to_string(),
                name: name.to_string(),
                image: image.to_string(),
                status: fields.next().unwrap_or("").trim().to_string(),
                ports: fields.next().unwrap_or("").trim().to_string(),
            })
        })
        .collect()
}

/// Parse `pm2 jlist` JSON output.
pub fn parse_pm2_listing(text: &str) -> Vec<ProcessManagerEntry> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return Vec::new();
    };
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            let pid = entry
                .get("pid")
                .and_then(|p| p.as_u64())
                .and_then(|p| u32::try_from(p).ok());
            let status = entry
                .pointer("/pm2_env/status")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string();
            Some(ProcessManagerEntry { name, pid, status })
        })
        .collect()
}

/// Parse `tmux list-sessions -F '#{session_name}'` output.
pub fn parse_multiplexer_sessions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Fixed keyword set for service-manager unit filtering: web servers,
/// databases, caches, process managers, runtimes.
pub const SERVICE_KEYWORDS: [&str; 17] = [
    "nginx",
    "apache",
    "httpd",
    "caddy",
    "mysql",
    "mariadb",
    "postgres",
    "mongo",
    "redis",
    "memcached",
    "docker",
    "pm2",
    "supervisor",
    "node",
    "php",
    "gunicorn",
    "uvicorn",
];

/// Parse `systemctl list-units --type=service --state=running --plain
/// --no-legend` output, keeping only units matching the keyword set
/// (case-insensitive).
pub fn parse_service_units(text: &str) -> Vec<ServiceUnit> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let unit = *fields.first()?;
            if !unit.ends_with(".service") {
                return None;
            }
            let lowered = unit.to_ascii_lowercase();
            if !SERVICE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
                return None;
            }
            Some(ServiceUnit {
                unit: unit.to_string(),
                active: fields.get(3).unwrap_or(&"").to_string(),
                description: fields.get(4..).unwrap_or(&[]).join(" "),
            })
        })
        .collect()
}

/// Line-oriented scan over reverse-proxy configuration.
///
/// A candidate record opens on a `server {` line and closes on a line that is
/// exactly a column-zero closing brace while a server name has been captured;
/// indented closes belong to nested blocks and are ignored. Content between
/// is irrelevant beyond the name/root/upstream directives.
pub fn parse_proxy_sites(text: &str) -> Vec<ProxySite> {
    let mut sites = Vec::new();
    let mut current: Option<ProxySite> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        let Some(site) = current.as_mut() else {
            if trimmed == "server {" || trimmed == "server{" {
                current = Some(ProxySite::default());
            }
            continue;
        };

        if let Some(rest) = trimmed.strip_prefix("server_name ") {
            if site.server_name.is_empty() {
                site.server_name = rest.trim().trim_end_matches(';').to_string();
            }
        } else if let Some(rest) = trimmed.strip_prefix("root ") {
            if site.root.is_none() {
                site.root = Some(rest.trim().trim_end_matches(';').to_string());
            }
        } else if let Some(rest) = trimmed.strip_prefix("proxy_pass ") {
            if site.upstream.is_none() {
                site.upstream = Some(rest.trim().trim_end_matches(';').to_string());
            }
        } else if line == "}" {
            if !site.server_name.is_empty() {
                sites.push(current.take().unwrap_or_default());
            } else {
                current = None;
            }
        }
    }
    sites
}

static SS_PROCESS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\(\("([^"]+)",pid=(\d+)"#).unwrap());
static NETSTAT_PROCESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)/([\w.-]+)").unwrap());

/// Parse `ss -tlnp` (or `netstat -tlnp`) output: address and port from the
/// combined `address:port` column, best-effort pid/name from the trailing
/// process-descriptor column.
pub fn parse_listening_sockets(text: &str) -> Vec<ListeningSocket> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty()
                || line.starts_with("State")
                || line.starts_with("Proto")
                || line.starts_with("Active")
            {
                return None;
            }

            let (address, port) = fields.iter().find_map(|field| {
                let (address, port) = field.rsplit_once(':')?;
                let port: u16 = port.parse().ok()?;
                Some((address.to_string(), port))
            })?;

            let mut process = None;
            let mut pid = None;
            if let Some(captures) = SS_PROCESS.captures(line) {
                process = Some(captures[1].to_string());
                pid = captures[2].parse().ok();
            } else if let Some(last) = fields.last()
                && let Some(captures) = NETSTAT_PROCESS.captures(last)
            {
                pid = captures[1].parse().ok();
                process = Some(captures[2].to_string());
            }

            Some(ListeningSocket {
                address,
                port,
                process,
                pid,
            })
        })
        .collect()
}

/// Group manifest file paths (one per line) by containing directory.
pub fn parse_project_roots(text: &str) -> Vec<ProjectRoot> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in text.lines() {
        let path = line.trim();
        if path.is_empty() {
            continue;
        }
        let Some((dir, file)) = path.rsplit_once('/') else {
            continue;
        };
        let manifests = grouped.entry(dir.to_string()).or_default();
        if !manifests.iter().any(|m| m == file) {
            manifests.push(file.to_string());
        }
    }
    grouped
        .into_iter()
        .map(|(path, manifests)| ProjectRoot { path, manifests })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_identity() {
        let text = "NAME=\"Ubuntu\"\nVERSION=\"22.04.4 LTS (Jammy Jellyfish)\"\nID=ubuntu\nLinux 6.8.0-41-generic";
        let os = parse_os_identity(text);
        assert_eq!(os.name, "Ubuntu");
        assert_eq!(os.version, "22.04.4 LTS (Jammy Jellyfish)");
        assert_eq!(os.kernel, "Linux 6.8.0-41-generic");
    }

    #[test]
    fn test_parse_container_listing() {
        let text = "abc123\tweb\tnginx:1.25\tUp 3 days\t0.0.0.0:80->80/tcp\nxyz789\tdb\tpostgres:16\tUp 3 days\t5432/tcp";
        let containers = parse_container_listing(text);
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "web");
        assert_eq!(containers[1].image, "postgres:16");
    }

    #[test]
    fn test_parse_pm2_listing() {
        let text = r#"[{"name":"api","pid":4242,"pm2_env":{"status":"online"}},{"name":"worker","pid":0,"pm2_env":{"status":"stopped"}}]"#;
        let entries = parse_pm2_listing(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "api");
        assert_eq!(entries[0].pid, Some(4242));
        assert_eq!(entries[1].status, "stopped");
    }

    #[test]
    fn test_parse_pm2_listing_garbage_is_empty() {
        assert!(parse_pm2_listing("command not found").is_empty());
    }

    #[test]
    fn test_parse_service_units_filters_by_keyword() {
        let text = "nginx.service loaded active running A high performance web server\n\
                    cron.service loaded active running Regular background program processing\n\
                    postgresql@16-main.service loaded active running PostgreSQL Cluster 16-main";
        let units = parse_service_units(text);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].unit, "nginx.service");
        assert_eq!(units[0].active, "running");
        assert_eq!(units[1].unit, "postgresql@16-main.service");
    }

    #[test]
    fn test_parse_proxy_sites() {
        let text = "\
server {
    listen 80;
    server_name app.example.com;
    root /var/www/app;
    location / {
        proxy_pass http://127.0.0.1:3000;
    }
}
server {
    listen 443 ssl;
}";
        let sites = parse_proxy_sites(text);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].server_name, "app.example.com");
        assert_eq!(sites[0].root.as_deref(), Some("/var/www/app"));
        assert_eq!(sites[0].upstream.as_deref(), Some("http://127.0.0.1:3000"));
    }

    #[test]
    fn test_proxy_scanner_ignores_indented_close() {
        let text = "\
server {
    server_name api.example.com;
    location / {
    }
    proxy_pass http://10.0.0.2:8080;
}";
        let sites = parse_proxy_sites(text);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].upstream.as_deref(), Some("http://10.0.0.2:8080"));
    }

    #[test]
    fn test_parse_listening_sockets_ss() {
        let text = "State  Recv-Q Send-Q Local Address:Port Peer Address:Port Process\n\
                    LISTEN 0      511    0.0.0.0:80        0.0.0.0:*         users:((\"nginx\",pid=1234,fd=6))\n\
                    LISTEN 0      128    [::]:22           [::]:*";
        let sockets = parse_listening_sockets(text);
        assert_eq!(sockets.len(), 2);
        assert_eq!(sockets[0].port, 80);
        assert_eq!(sockets[0].process.as_deref(), Some("nginx"));
        assert_eq!(sockets[0].pid, Some(1234));
        assert_eq!(sockets[1].address, "[::]");
        assert!(sockets[1].process.is_none());
    }

    #[test]
    fn test_parse_listening_sockets_netstat() {
        let text = "Proto Recv-Q Send-Q Local Address Foreign Address State PID/Program name\n\
                    tcp 0 0 127.0.0.1:6379 0.0.0.0:* LISTEN 999/redis-server";
        let sockets = parse_listening_sockets(text);
        assert_eq!(sockets.len(), 1);
        assert_eq!(sockets[0].port, 6379);
        assert_eq!(sockets[0].process.as_deref(), Some("redis-server"));
        assert_eq!(sockets[0].pid, Some(999));
    }

    #[test]
    fn test_parse_project_roots_groups_by_directory() {
        let text = "/home/dev/web/package.json\n\
                    /home/dev/web/docker-compose.yml\n\
                    /home/dev/api/Cargo.toml";
        let roots = parse_project_roots(text);
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].path, "/home/dev/api");
        assert_eq!(roots[0].manifests, vec!["Cargo.toml"]);
        assert_eq!(
            roots[1].manifests,
            vec!["package.json", "docker-compose.yml"]
        );
    }
}
