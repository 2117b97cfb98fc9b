// Built-in tool catalog
//
// Registration order here is the order `ToolRegistry::list` reports.

use super::registry::{ToolCategory, ToolDefinition};

pub(crate) fn builtin_tools() -> Vec<ToolDefinition> {
    let mut tools = recon_tools();
    tools.extend(scanning_tools());
    tools.extend(exploit_tools());
    tools
}

fn recon_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new("subfinder", ToolCategory::Recon, "subfinder")
            .default_args(["-silent"])
            .version_flag("-version")
            .description("Fast passive subdomain enumeration tool using multiple sources")
            .install_hints(
                "go install -v github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest",
                "brew install subfinder",
                "go install -v github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest",
            ),
        ToolDefinition::new("amass", ToolCategory::Recon, "amass")
            .default_args(["enum", "-passive"])
            .version_flag("-version")
            .description("In-depth attack surface mapping and asset discovery via DNS")
            .install_hints(
                "go install -v github.com/owasp-amass/amass/v4/...@master",
                "brew install amass",
                "go install -v github.com/owasp-amass/amass/v4/...@master",
            ),
        // theHarvester has no version flag; the banner of --help carries it
        ToolDefinition::new("theharvester", ToolCategory::Recon, "theHarvester")
            .default_args(["-b", "all"])
            .version_flag("--help")
            .description("Gathers emails, subdomains, hosts, and open ports from public sources")
            .install_hints(
                "pip install theHarvester",
                "pip install theHarvester",
                "pip install theHarvester",
            ),
        ToolDefinition::new("whois", ToolCategory::Recon, "whois")
            .description("Query WHOIS databases for domain registration and ownership info")
            .install_hints(
                "apt install whois",
                "pre-installed on macOS",
                "choco install whois",
            ),
        ToolDefinition::new("dig", ToolCategory::Recon, "dig")
            .version_flag("-v")
            .description("DNS lookup utility for querying DNS records")
            .install_hints(
                "apt install dnsutils",
                "pre-installed on macOS",
                "choco install bind-toolsonly",
            ),
    ]
}

fn scanning_tools() -> Vec<ToolDefinition> {
    vec![
        // SYN scans and OS detection need raw sockets
        ToolDefinition::new("nmap", ToolCategory::Scanning, "nmap")
            .needs_root(true)
            .version_flag("--version")
            .description("Network discovery and security auditing with port scanning")
            .install_hints("apt install nmap", "brew install nmap", "choco install nmap"),
        ToolDefinition::new("masscan", ToolCategory::Scanning, "masscan")
            .needs_root(true)
            .version_flag("--version")
            .description("Fastest Internet port scanner, supports async SYN scanning")
            .install_hints(
                "apt install masscan",
                "brew install masscan",
                "download from https://github.com/robertdavidgraham/masscan",
            ),
        ToolDefinition::new("nuclei", ToolCategory::Scanning, "nuclei")
            .default_args(["-silent"])
            .version_flag("-version")
            .description("Template-based vulnerability scanner with community-driven templates")
            .install_hints(
                "go install -v github.com/projectdiscovery/nuclei/v3/cmd/nuclei@latest",
                "brew install nuclei",
                "go install -v github.com/projectdiscovery/nuclei/v3/cmd/nuclei@latest",
            ),
        ToolDefinition::new("gobuster", ToolCategory::Scanning, "gobuster")
            .version_flag("version")
            .description("Directory and DNS brute-force scanner for web applications")
            .install_hints(
                "go install github.com/OJ/gobuster/v3@latest",
                "brew install gobuster",
                "go install github.com/OJ/gobuster/v3@latest",
            ),
        ToolDefinition::new("ffuf", ToolCategory::Scanning, "ffuf")
            .version_flag("-V")
            .description("Fast web fuzzer for content discovery and parameter brute-forcing")
            .install_hints(
                "go install github.com/ffuf/ffuf/v2@latest",
                "brew install ffuf",
                "go install github.com/ffuf/ffuf/v2@latest",
            ),
        ToolDefinition::new("nikto", ToolCategory::Scanning, "nikto")
            .version_flag("-Version")
            .description("Web server scanner that tests for dangerous files and outdated software")
            .install_hints(
                "apt install nikto",
                "brew install nikto",
                "download from https://github.com/sullo/nikto",
            ),
    ]
}

fn exploit_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new("sqlmap", ToolCategory::Exploit, "sqlmap")
            .default_args(["--batch"])
            .version_flag("--version")
            .description("Automatic SQL injection detection and database takeover")
            .install_hints("apt install sqlmap", "brew install sqlmap", "pip install sqlmap"),
        ToolDefinition::new("hydra", ToolCategory::Exploit, "hydra")
            .description("Fast parallelized network login cracker supporting dozens of protocols")
            .install_hints(
                "apt install hydra",
                "brew install hydra",
                "download from https://github.com/vanhauser-thc/thc-hydra",
            ),
    ]
}
