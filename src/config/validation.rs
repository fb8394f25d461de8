use crate::config::types::{Config, CrawlerConfig, DatabaseConfig, SelectorConfig, SourceEntry};
use crate::{ConfigError, ConfigResult};
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_crawler_config(&config.crawler)?;
    validate_database_config(&config.database)?;
    validate_sources(&config.sources)?;
    validate_exclude_defaults(&config.exclude_defaults)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> ConfigResult<()> {
    if config.lock_path.is_empty() {
        return Err(ConfigError::Validation(
            "lock-path cannot be empty".to_string(),
        ));
    }

    if config.request_delay_min > config.request_delay_max {
        return Err(ConfigError::Validation(format!(
            "request-delay-min ({}ms) must not exceed request-delay-max ({}ms)",
            config.request_delay_min, config.request_delay_max
        )));
    }

    if config.request_timeout == 0 {
        return Err(ConfigError::Validation(
            "request-timeout must be >= 1 second".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max-pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    Ok(())
}

fn validate_database_config(config: &DatabaseConfig) -> ConfigResult<()> {
    if config.path.is_empty() {
        return Err(ConfigError::Validation(
            "database path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates source entries and their URL templates
fn validate_sources(sources: &[SourceEntry]) -> ConfigResult<()> {
    let mut seen = HashSet::new();

    for entry in sources {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source name cannot be empty".to_string(),
            ));
        }

        if !seen.insert(entry.name.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "source '{}' is configured more than once",
                entry.name
            )));
        }

        validate_http_url(&entry.base_url, &format!("base-url of '{}'", entry.name))?;

        match (&entry.listing_url, &entry.search_url) {
            (Some(listing), None) => {
                validate_template(listing, &["{page}"], &entry.name, "listing-url")?;
            }
            (None, Some(search)) => {
                validate_template(search, &["{term}", "{page}"], &entry.name, "search-url")?;
            }
            _ => {
                return Err(ConfigError::Validation(format!(
                    "source '{}' must set exactly one of listing-url or search-url",
                    entry.name
                )));
            }
        }

        if entry.max_pages == Some(0) {
            return Err(ConfigError::Validation(format!(
                "max-pages of '{}' must be >= 1",
                entry.name
            )));
        }

        validate_selectors(&entry.selectors, &entry.name)?;
    }

    Ok(())
}

fn validate_template(
    template: &str,
    placeholders: &[&str],
    source: &str,
    field: &str,
) -> ConfigResult<()> {
    for placeholder in placeholders {
        if !template.contains(placeholder) {
            return Err(ConfigError::Validation(format!(
                "{} of '{}' must contain {}",
                field, source, placeholder
            )));
        }
    }

    // Placeholders must survive URL parsing once filled in
    let sample = template.replace("{term}", "sample").replace("{page}", "1");
    validate_http_url(&sample, &format!("{} of '{}'", field, source))
}

fn validate_http_url(value: &str, what: &str) -> ConfigResult<()> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", what, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            what, value
        )));
    }

    Ok(())
}

fn validate_selectors(selectors: &SelectorConfig, source: &str) -> ConfigResult<()> {
    let required = [
        ("item", Some(&selectors.item)),
        ("title", Some(&selectors.title)),
        ("link", Some(&selectors.link)),
        ("price", selectors.price.as_ref()),
        ("image", selectors.image.as_ref()),
    ];

    for (field, value) in required {
        if let Some(css) = value {
            Selector::parse(css).map_err(|e| {
                ConfigError::InvalidSelector(format!(
                    "{} selector '{}' of '{}': {:?}",
                    field, css, source, e
                ))
            })?;
        }
    }

    Ok(())
}

fn validate_exclude_defaults(terms: &[String]) -> ConfigResult<()> {
    if terms.iter().any(|t| t.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "exclude-defaults cannot contain empty terms".to_string(),
        ));
    }
    Ok(())
}
