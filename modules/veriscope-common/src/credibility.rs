use url::Url;

use crate::types::Credibility;

// Research publishers and archives that outrank their TLD.
const ACADEMIC_DOMAINS: &[&str] = &[
    "arxiv.org",
    "doi.org",
    "ncbi.nlm.nih.gov",
    "nature.com",
    "science.org",
    "sciencedirect.com",
    "springer.com",
    "jstor.org",
    "researchgate.net",
    "semanticscholar.org",
    "plos.org",
];

// Intergovernmental bodies without a .gov/.mil TLD.
const OFFICIAL_DOMAINS: &[&str] = &[
    "who.int",
    "un.org",
    "europa.eu",
    "oecd.org",
    "imf.org",
    "worldbank.org",
];

const NEWS_DOMAINS: &[&str] = &[
    "reuters.com",
    "apnews.com",
    "bbc.com",
    "bbc.co.uk",
    "nytimes.com",
    "washingtonpost.com",
    "theguardian.com",
    "wsj.com",
    "bloomberg.com",
    "economist.com",
    "npr.org",
    "cnn.com",
    "ft.com",
    "aljazeera.com",
];

const BLOG_PLATFORMS: &[&str] = &[
    "medium.com",
    "substack.com",
    "wordpress.com",
    "blogspot.com",
    "blogger.com",
    "tumblr.com",
    "dev.to",
    "hashnode.dev",
    "ghost.io",
];

/// Classify a source URL into a credibility tier by its hostname.
/// Pure and deterministic; the fetcher caches the answer per host.
/// Unparseable URLs and unrecognized hosts are `Unknown`, never an error.
pub fn classify_domain(url: &str) -> Credibility {
    let Some(host) = host_of(url) else {
        return Credibility::Unknown;
    };

    if ACADEMIC_DOMAINS.iter().any(|d| matches_domain(&host, d))
        || host.ends_with(".edu")
        || host.contains(".edu.")
        || host.contains(".ac.")
    {
        return Credibility::Academic;
    }

    if host.ends_with(".gov")
        || host.contains(".gov.")
        || host.ends_with(".mil")
        || OFFICIAL_DOMAINS.iter().any(|d| matches_domain(&host, d))
    {
        return Credibility::Official;
    }

    if NEWS_DOMAINS.iter().any(|d| matches_domain(&host, d)) {
        return Credibility::News;
    }

    if BLOG_PLATFORMS.iter().any(|d| matches_domain(&host, d)) {
        return Credibility::Blog;
    }

    Credibility::Unknown
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

// Matches the domain itself and any subdomain of it.
fn matches_domain(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn academic_hosts() {
        assert_eq!(classify_domain("https://arxiv.org/abs/2401.1"), Credibility::Academic);
        assert_eq!(classify_domain("https://cs.stanford.edu/paper"), Credibility::Academic);
        assert_eq!(classify_domain("https://www.ox.ac.uk/research"), Credibility::Academic);
        assert_eq!(
            classify_domain("https://pubmed.ncbi.nlm.nih.gov/12345/"),
            Credibility::Academic
        );
    }

    #[test]
    fn official_hosts() {
        assert_eq!(classify_domain("https://www.cdc.gov/flu"), Credibility::Official);
        assert_eq!(classify_domain("https://www.gov.uk/guidance"), Credibility::Official);
        assert_eq!(classify_domain("https://www.who.int/news"), Credibility::Official);
    }

    #[test]
    fn news_hosts() {
        assert_eq!(classify_domain("https://www.reuters.com/world"), Credibility::News);
        assert_eq!(classify_domain("https://bbc.co.uk/news/x"), Credibility::News);
    }

    #[test]
    fn blog_hosts_including_subdomains() {
        assert_eq!(classify_domain("https://medium.com/@a/post"), Credibility::Blog);
        assert_eq!(classify_domain("https://someone.substack.com/p/x"), Credibility::Blog);
        assert_eq!(classify_domain("https://foo.blogspot.com/2020/1.html"), Credibility::Blog);
    }

    #[test]
    fn unknown_for_everything_else() {
        assert_eq!(classify_domain("https://example.com/page"), Credibility::Unknown);
        assert_eq!(classify_domain("not a url"), Credibility::Unknown);
        assert_eq!(classify_domain(""), Credibility::Unknown);
    }

    #[test]
    fn academic_beats_gov_for_research_archives() {
        // ncbi.nlm.nih.gov is a .gov host but serves research, not policy
        assert_eq!(
            classify_domain("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC1/"),
            Credibility::Academic
        );
    }
}
