//! Robots.txt parsing and a per-host cache used by the Deep Scanner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::traits::fetcher::PageFetcher;

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    /// Rules per user-agent token (lowercase)
    rules: HashMap<String, AgentRules>,

    /// Rules for `*`
    default_rules: AgentRules,
}

#[derive(Debug, Clone, Default)]
struct AgentRules {
    disallow: Vec<String>,
    allow: Vec<String>,
    crawl_delay: Option<f64>,
}

impl RobotsTxt {
    /// Parse robots.txt content. Unknown directives are ignored.
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut agents: Vec<String> = Vec::new();
        let mut rules = AgentRules::default();
        // A group ends when a user-agent line follows a rule line.
        let mut in_rules = false;

        let flush = |robots: &mut RobotsTxt, agents: &mut Vec<String>, rules: &mut AgentRules| {
            for agent in agents.drain(..) {
                if agent == "*" {
                    robots.default_rules = rules.clone();
                } else {
                    robots.rules.insert(agent, rules.clone());
                }
            }
            *rules = AgentRules::default();
        };

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match directive.trim().to_lowercase().as_str() {
                "user-agent" => {
                    if in_rules {
                        flush(&mut robots, &mut agents, &mut rules);
                        in_rules = false;
                    }
                    if !value.is_empty() {
                        agents.push(value.to_lowercase());
                    }
                }
                "disallow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        rules.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        rules.allow.push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    in_rules = true;
                    rules.crawl_delay = value
                        .parse::<f64>()
                        .ok()
                        .filter(|d| (0.0..=3600.0).contains(d));
                }
                _ => {}
            }
        }
        flush(&mut robots, &mut agents, &mut rules);

        robots
    }

    fn rules_for(&self, user_agent: &str) -> &AgentRules {
        let agent = user_agent.to_lowercase();
        self.rules
            .get(&agent)
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|(token, _)| agent.contains(token.as_str()))
                    .map(|(_, rules)| rules)
            })
            .unwrap_or(&self.default_rules)
    }

    /// Whether `path` may be fetched.
    ///
    /// The longest matching rule wins; on a tie `Allow` wins.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let rules = self.rules_for(user_agent);
        let longest = |prefixes: &[String]| {
            prefixes
                .iter()
                .filter(|p| path.starts_with(p.as_str()))
                .map(|p| p.len())
                .max()
        };

        match (longest(&rules.allow), longest(&rules.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }

    /// Crawl delay requested for a user agent.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.rules_for(user_agent)
            .crawl_delay
            .map(Duration::from_secs_f64)
    }
}

/// Per-host robots.txt cache.
///
/// Each host's robots.txt is fetched once. An unreachable or non-2xx
/// robots.txt allows everything.
pub struct RobotsCache {
    user_agent: String,
    entries: RwLock<HashMap<String, Arc<RobotsTxt>>>,
}

impl RobotsCache {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Check a URL against its host's robots.txt, fetching it on first use.
    pub async fn is_allowed<F: PageFetcher + ?Sized>(&self, fetcher: &F, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let origin = match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
            None => format!("{}://{}", parsed.scheme(), host),
        };

        let robots = self.get_or_fetch(fetcher, &origin).await;
        robots.is_allowed(&self.user_agent, parsed.path())
    }

    async fn get_or_fetch<F: PageFetcher + ?Sized>(
        &self,
        fetcher: &F,
        origin: &str,
    ) -> Arc<RobotsTxt> {
        if let Some(cached) = self.entries.read().await.get(origin) {
            return cached.clone();
        }

        let robots_url = format!("{}/robots.txt", origin);
        let robots = match fetcher.fetch(&robots_url).await {
            Ok(page) if page.is_success() => RobotsTxt::parse(&page.body),
            Ok(page) => {
                debug!(url = %robots_url, status = page.status, "No robots.txt, allowing all");
                RobotsTxt::default()
            }
            Err(e) => {
                debug!(url = %robots_url, error = %e, "robots.txt unreachable, allowing all");
                RobotsTxt::default()
            }
        };

        let robots = Arc::new(robots);
        self.entries
            .write()
            .await
            .insert(origin.to_string(), robots.clone());
        robots
    }
}
