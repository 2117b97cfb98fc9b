// Tool documentation and usage examples
//
// Seeded with INSERT OR IGNORE every time the database opens, so edits made
// directly in the database survive restarts.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::Database;
use crate::error::Result;

/// One canned invocation shown next to a tool's docs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExample {
    pub title: String,
    pub description: String,
    pub command: String,
    pub sort_order: i64,
}

/// Markdown documentation plus ordered examples for a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDocs {
    pub tool_name: String,
    pub documentation: String,
    pub examples: Vec<ToolExample>,
}

/// Read access to the documentation tables
#[derive(Debug, Clone)]
pub struct DocStore {
    db: Database,
}

impl DocStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Docs for `tool`; unknown tools yield empty text and no examples
    pub async fn documentation(&self, tool: &str) -> Result<ToolDocs> {
        let tool = tool.to_string();
        self.db
            .call(move |conn| {
                let documentation: String = conn
                    .query_row(
                        "SELECT documentation FROM tool_docs WHERE tool_name = ?1",
                        params![tool],
                        |row| row.get(0),
                    )
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(String::new()),
                        other => Err(other),
                    })?;

                let mut stmt = conn.prepare(
                    "SELECT title, description, command, sort_order FROM tool_examples \
                     WHERE tool_name = ?1 ORDER BY sort_order, id",
                )?;
                let examples = stmt
                    .query_map(params![tool], |row| {
                        Ok(ToolExample {
                            title: row.get(0)?,
                            description: row.get(1)?,
                            command: row.get(2)?,
                            sort_order: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(ToolDocs {
                    tool_name: tool,
                    documentation,
                    examples,
                })
            })
            .await
    }
}

pub(super) fn seed(conn: &Connection) -> Result<()> {
    {
        let mut stmt =
            conn.prepare("INSERT OR IGNORE INTO tool_docs (tool_name, documentation) VALUES (?1, ?2)")?;
        for (tool, doc) in DOCS {
            stmt.execute(params![tool, doc])?;
        }
    }
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO tool_examples (tool_name, title, description, command, sort_order) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (tool, title, description, command, order) in EXAMPLES {
        stmt.execute(params![tool, title, description, command, order])?;
    }
    Ok(())
}

const DOCS: &[(&str, &str)] = &[
    (
        "nmap",
        r#"# Nmap

Nmap ("Network Mapper") is a free, open-source utility for network discovery and security auditing. It uses raw IP packets to determine available hosts, services, OS versions, firewalls, and more.

## Key Features
- Host discovery and port scanning
- Service and version detection (`-sV`)
- OS fingerprinting (`-O`)
- Scriptable interaction via NSE scripts (`--script`)
- Multiple output formats (XML, grepable, normal)

## Common Flags
| Flag | Purpose |
|------|--------|
| `-sS` | TCP SYN scan (stealthy, needs root) |
| `-sV` | Version detection |
| `-O` | OS detection |
| `-A` | Aggressive scan (OS + version + scripts + traceroute) |
| `-p-` | Scan all 65535 ports |
| `--top-ports N` | Scan top N most common ports |"#,
    ),
    (
        "masscan",
        r#"# Masscan

Masscan is the fastest Internet port scanner. It can scan the entire Internet in under 6 minutes, transmitting 10 million packets per second.

## Key Features
- Asynchronous SYN scanning
- Banner grabbing
- Supports IP ranges and CIDR notation
- Output compatible with nmap XML format

## Common Flags
| Flag | Purpose |
|------|--------|
| `-p` | Port(s) to scan |
| `--rate` | Packets per second |
| `--banners` | Grab service banners |
| `-oX` | XML output (nmap compatible) |"#,
    ),
    (
        "nuclei",
        r#"# Nuclei

Nuclei sends requests across targets based on templates, giving fast scanning on a large number of hosts with very few false positives.

## Key Features
- Template-based scanning (YAML)
- Community-driven template library (nuclei-templates)
- Supports HTTP, DNS, TCP, and more
- Severity-based filtering

## Common Flags
| Flag | Purpose |
|------|--------|
| `-t` | Template or directory to use |
| `-severity` | Filter by severity (info, low, medium, high, critical) |
| `-as` | Automatic web scan |
| `-tags` | Execute templates by tags |"#,
    ),
    (
        "gobuster",
        r#"# Gobuster

Gobuster brute-forces URIs, DNS subdomains, virtual host names, and more.

## Modes
- `dir`: directory and file brute-forcing
- `dns`: DNS subdomain brute-forcing
- `vhost`: virtual host brute-forcing
- `fuzz`: fuzzing mode

## Common Flags
| Flag | Purpose |
|------|--------|
| `-u` | Target URL |
| `-w` | Wordlist file path |
| `-t` | Number of concurrent threads |
| `-x` | File extensions to search for |"#,
    ),
    (
        "ffuf",
        r#"# ffuf

ffuf (Fuzz Faster U Fool) is a fast web fuzzer used for directory discovery, parameter fuzzing, and more.

## Key Features
- Highly concurrent
- Flexible keyword placement with the FUZZ marker
- Supports multiple wordlists
- Filtering and matching by status, size, words, lines

## Common Flags
| Flag | Purpose |
|------|--------|
| `-u` | Target URL (place FUZZ keyword) |
| `-w` | Wordlist path |
| `-mc` | Match HTTP status codes |
| `-fc` | Filter HTTP status codes |
| `-fs` | Filter by response size |"#,
    ),
    (
        "nikto",
        r#"# Nikto

Nikto is an open-source web server scanner which tests for dangerous files/CGIs, outdated server software, and other problems.

## Key Features
- Tests for 6700+ potentially dangerous files
- Checks for outdated versions of 1250+ servers
- Version specific problems on 270+ servers
- SSL support

## Common Flags
| Flag | Purpose |
|------|--------|
| `-h` | Target host |
| `-p` | Port to scan |
| `-Tuning` | Scan tuning (test types) |
| `-o` | Output file |"#,
    ),
    (
        "subfinder",
        r#"# Subfinder

Subfinder is a subdomain discovery tool that returns valid subdomains for websites using passive online sources.

## Key Features
- Passive enumeration (no direct contact with target)
- Uses 40+ sources (Censys, Shodan, VirusTotal, etc.)
- Fast and lightweight
- JSON output support

## Common Flags
| Flag | Purpose |
|------|--------|
| `-d` | Target domain |
| `-o` | Output file |
| `-silent` | Show only results |
| `-sources` | Comma-separated list of sources |"#,
    ),
    (
        "amass",
        r#"# Amass

The OWASP Amass Project performs network mapping of attack surfaces and external asset discovery using open source intelligence.

## Key Features
- DNS enumeration and network mapping
- Passive and active modes
- Integration with multiple data sources
- Graph database for relationship tracking

## Subcommands
| Subcommand | Purpose |
|------|--------|
| `enum` | Perform enumerations and network mapping |
| `intel` | Discover targets for enumerations |
| `db` | Manage the graph databases |"#,
    ),
    (
        "theharvester",
        r#"# theHarvester

theHarvester gathers open source intelligence (OSINT) on a company or domain. It collects emails, names, subdomains, IPs, and URLs.

## Key Features
- Email harvesting
- Subdomain enumeration
- Virtual host discovery
- Multiple search engine support

## Common Flags
| Flag | Purpose |
|------|--------|
| `-d` | Target domain |
| `-b` | Data source (google, bing, linkedin, all) |
| `-l` | Limit results |
| `-f` | Output to HTML and XML files |"#,
    ),
    (
        "whois",
        r#"# Whois

Whois queries WHOIS databases for domain registration details including registrar, nameservers, creation/expiry dates, and registrant contact information.

## Key Features
- Domain ownership lookup
- Registrar and nameserver info
- Registration and expiry dates
- IP address block information

## Usage Notes
Basic lookups need no flags: pass the domain or IP as the target."#,
    ),
    (
        "dig",
        r#"# Dig

Dig (Domain Information Groper) is a DNS lookup utility for querying DNS nameservers and the usual first stop for DNS troubleshooting.

## Key Features
- Query any DNS record type (A, AAAA, MX, NS, TXT, etc.)
- Trace DNS delegation path
- Reverse DNS lookups
- Batch mode for multiple queries

## Common Flags
| Flag | Purpose |
|------|--------|
| `@server` | DNS server to query |
| `+short` | Show only the answer |
| `+trace` | Trace delegation path |
| `-x` | Reverse DNS lookup |"#,
    ),
    (
        "sqlmap",
        r#"# SQLMap

SQLMap automates the detection and exploitation of SQL injection flaws. It supports a wide range of database management systems.

## Key Features
- Automatic SQL injection detection
- Database fingerprinting
- Data extraction from databases
- File system access and OS command execution
- Support for MySQL, PostgreSQL, Oracle, MSSQL, SQLite, and more

## Common Flags
| Flag | Purpose |
|------|--------|
| `-u` | Target URL with injectable parameter |
| `--dbs` | Enumerate databases |
| `--tables` | Enumerate tables |
| `--dump` | Dump table contents |
| `--batch` | Non-interactive mode |
| `--risk` | Risk level (1-3, higher = more tests) |"#,
    ),
    (
        "hydra",
        r#"# Hydra

Hydra is a fast and flexible network login cracker. It supports dozens of protocols including SSH, FTP, HTTP, SMB, and more.

## Key Features
- 50+ protocol support
- Parallelized connections
- Supports user/password lists and combo files
- Session restore on interruption

## Common Flags
| Flag | Purpose |
|------|--------|
| `-l` / `-L` | Login name / Login name list |
| `-p` / `-P` | Password / Password list |
| `-t` | Number of parallel tasks |
| `-s` | Port (if non-default) |
| `-f` | Stop after first valid pair |"#,
    ),
];

const EXAMPLES: &[(&str, &str, &str, &str, i64)] = &[
    ("nmap", "Quick SYN scan", "Fast SYN scan of top 1000 ports", "nmap -sS 10.0.0.1", 1),
    ("nmap", "Full port scan with version detection", "Scan all ports and detect service versions", "nmap -sV -p- 10.0.0.1", 2),
    ("nmap", "Aggressive scan", "OS detection, version detection, script scanning, and traceroute", "nmap -A 10.0.0.1", 3),
    ("masscan", "Scan common ports", "Scan top web ports at 10k packets/sec", "masscan -p80,443,8080 10.0.0.0/24 --rate=10000", 1),
    ("masscan", "Full port scan", "Scan all ports on a single host", "masscan -p0-65535 10.0.0.1 --rate=1000", 2),
    ("nuclei", "Automatic web scan", "Run automatic web technology detection and scanning", "nuclei -as -u https://example.com", 1),
    ("nuclei", "CVE templates only", "Scan using only CVE templates", "nuclei -t cves/ -u https://example.com", 2),
    ("gobuster", "Directory brute-force", "Discover directories using a common wordlist", "gobuster dir -u https://example.com -w /usr/share/wordlists/dirb/common.txt", 1),
    ("gobuster", "DNS subdomain enumeration", "Brute-force subdomains", "gobuster dns -d example.com -w /usr/share/wordlists/subdomains.txt", 2),
    ("ffuf", "Directory fuzzing", "Fuzz for directories with status code filtering", "ffuf -u https://example.com/FUZZ -w wordlist.txt -mc 200,301", 1),
    ("ffuf", "Parameter fuzzing", "Fuzz a GET parameter value", "ffuf -u https://example.com/page?id=FUZZ -w /usr/share/wordlists/nums.txt", 2),
    ("nikto", "Basic web scan", "Scan a web server for known vulnerabilities", "nikto -h https://example.com", 1),
    ("subfinder", "Enumerate subdomains", "Find subdomains for a domain passively", "subfinder -d example.com", 1),
    ("subfinder", "JSON output", "Output subdomains in JSON format", "subfinder -d example.com -oJ -silent", 2),
    ("amass", "Passive enumeration", "Passive subdomain enumeration", "amass enum -passive -d example.com", 1),
    ("theharvester", "Search all sources", "Gather emails and subdomains from all sources", "theHarvester -d example.com -b all", 1),
    ("whois", "Domain lookup", "Look up registration info for a domain", "whois example.com", 1),
    ("dig", "A record lookup", "Query A records for a domain", "dig example.com A", 1),
    ("dig", "Trace delegation", "Trace the full DNS delegation path", "dig +trace example.com", 2),
    ("sqlmap", "Test a URL parameter", "Test a GET parameter for SQL injection", "sqlmap -u 'https://example.com/page?id=1' --batch", 1),
    ("sqlmap", "Enumerate databases", "Detect injection and list databases", "sqlmap -u 'https://example.com/page?id=1' --dbs --batch", 2),
    ("hydra", "SSH brute-force", "Brute-force SSH login with a password list", "hydra -l admin -P /usr/share/wordlists/rockyou.txt ssh://10.0.0.1", 1),
    ("hydra", "HTTP form brute-force", "Brute-force a web login form", "hydra -l admin -P passwords.txt 10.0.0.1 http-post-form '/login:user=^USER^&pass=^PASS^:F=incorrect'", 2),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_docs_and_ordered_examples() {
        let store = DocStore::new(Database::open_in_memory().unwrap());
        let docs = store.documentation("nmap").await.unwrap();

        assert!(docs.documentation.starts_with("# Nmap"));
        let titles: Vec<&str> = docs.examples.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Quick SYN scan", "Full port scan with version detection", "Aggressive scan"]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_empty() {
        let store = DocStore::new(Database::open_in_memory().unwrap());
        let docs = store.documentation("doesnotexist").await.unwrap();
        assert_eq!(docs.tool_name, "doesnotexist");
        assert!(docs.documentation.is_empty());
        assert!(docs.examples.is_empty());
    }

    #[tokio::test]
    async fn test_seed_does_not_overwrite_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");

        let db = Database::open(&path).unwrap();
        db.call(|conn| {
            conn.execute(
                "UPDATE tool_docs SET documentation = 'team notes' WHERE tool_name = 'dig'",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();
        drop(db);

        let store = DocStore::new(Database::open(&path).unwrap());
        assert_eq!(store.documentation("dig").await.unwrap().documentation, "team notes");
        assert_eq!(store.documentation("dig").await.unwrap().examples.len(), 2);
    }

    #[test]
    fn test_seed_counts() {
        assert_eq!(DOCS.len(), 13);
        assert_eq!(EXAMPLES.len(), 23);
        for (tool, ..) in EXAMPLES {
            assert!(DOCS.iter().any(|(name, _)| name == tool), "{tool} has examples but no docs");
        }
    }
}
