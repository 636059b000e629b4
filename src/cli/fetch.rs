// ABOUTME: CLI fetch command - open an HTTP handle, read it, print the body, close it

use std::io::Write;

use anyhow::{anyhow, Result};
use serde_json::Value;

use super::{FetchArgs, Method};
use crate::broker::{BrokerClient, BrokerConfig, Options};

/// Execute the fetch command
pub fn execute(args: FetchArgs, config: &BrokerConfig) -> Result<()> {
    let client = BrokerClient::new(config)?;
    let mut conn = match args.port {
        Some(port) => client.connect_to(port),
        None => client.connect(),
    };

    let options = build_options(&args)?;
    let body = match args.method {
        Method::Get => conn.get(&args.url, options)?,
        Method::Post => {
            let data = args.data.clone().map_or(Value::Null, Value::String);
            conn.post(&args.url, data, options)?
        }
    };
    conn.close()?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(body.as_deref().unwrap_or_default())?;
    stdout.flush()?;
    Ok(())
}

/// Headers and proxy as handle options
fn build_options(args: &FetchArgs) -> Result<Options> {
    let mut options = Options::new();

    if !args.headers.is_empty() {
        let mut headers = Options::new();
        for header in &args.headers {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow!("Header must be `name: value`, got {header:?}"))?;
            headers.insert(name.trim().to_string(), Value::from(value.trim()));
        }
        options.insert("headers".to_string(), Value::Object(headers));
    }
    if let Some(proxy) = &args.proxy {
        options.insert("proxy".to_string(), Value::from(proxy.as_str()));
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(headers: &[&str]) -> FetchArgs {
        FetchArgs {
            url: "http://example.test/".to_string(),
            method: Method::Get,
            data: None,
            headers: headers.iter().map(ToString::to_string).collect(),
            proxy: Some("http://127.0.0.1:3128".to_string()),
            port: None,
        }
    }

    #[test]
    fn test_build_options() {
        let options = build_options(&args(&["x-token: abc", "Accept:text/html"])).unwrap();
        assert_eq!(
            Value::Object(options),
            json!({
                "headers": {"x-token": "abc", "Accept": "text/html"},
                "proxy": "http://127.0.0.1:3128",
            })
        );
    }

    #[test]
    fn test_bad_header_is_rejected() {
        assert!(build_options(&args(&["no-colon"])).is_err());
    }
}
