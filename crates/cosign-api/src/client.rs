//! Blocking HTTP implementation of [`LedgerService`].
//!
//! Every request carries the API key in the query string and is signed with
//! [`RequestSigner`] over `(request-target) date content-md5`.

use chrono::Utc;
use cosign_core::error::LedgerError;
use cosign_core::path::DerivationPath;
use cosign_core::traits::LedgerService;
use cosign_core::types::{
    CoinSelection, CreateWalletRequest, CreateWalletResponse, KeyWithPath, NewDerivation,
    Recipient, UpgradeKeyIndexRequest, UpgradeKeyIndexResponse, WalletBalance, WalletData,
};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, DATE};
use reqwest::{Method, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{ApiConfig, USER_AGENT};
use crate::response::{check_status, parse_json};
use crate::signing::{RequestParts, RequestSigner, http_date, request_content_md5};

fn transport(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Transport(e.to_string())
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

#[derive(Deserialize)]
struct SendResponse {
    txid: String,
}

/// Ledger service client over HTTPS.
pub struct HttpLedgerClient {
    http: Client,
    base_url: Url,
    api_key: String,
    signer: RequestSigner,
}

impl HttpLedgerClient {
    pub fn new(config: &ApiConfig) -> Result<Self, LedgerError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(transport)?;
        let base_url = Url::parse(&config.endpoint()).map_err(transport)?;
        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            signer: RequestSigner::new(config.api_key.clone(), &config.api_secret),
        })
    }

    /// Base URL requests are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.base_url
    }

    /// Submit a signed message proving ownership of `address`.
    pub fn verify_address(&self, address: &str, signature: &str) -> Result<Value, LedgerError> {
        self.call(
            Method::POST,
            &["address", address, "verify"],
            &[],
            Some(&json!({ "signature": signature })),
        )
    }

    fn url(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, LedgerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| transport("endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api_key", &self.api_key);
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T, LedgerError> {
        let url = self.url(segments, query)?;
        let body_text = match body {
            Some(value) => serde_json::to_string(value).map_err(transport)?,
            None => String::new(),
        };
        let path_and_query = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        let md5 = request_content_md5(method.as_str(), &body_text, &path_and_query);
        let date = http_date(Utc::now());
        let authorization = self.signer.authorization(&RequestParts {
            method: method.as_str(),
            path_and_query: &path_and_query,
            date: &date,
            content_md5: &md5,
        });
        debug!(method = %method, path = %url.path(), "ledger request");

        let mut request = self
            .http
            .request(method, url)
            .header(DATE, date.as_str())
            .header("Content-MD5", md5.as_str())
            .header(AUTHORIZATION, authorization);
        if body.is_some() {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body_text);
        }
        let response = request.send().map_err(transport)?;
        let status = response.status().as_u16();
        let text = response.text().map_err(transport)?;
        debug!(status, bytes = text.len(), "ledger response");

        check_status(status, &text)?;
        parse_json(&text)
    }

    fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, LedgerError> {
        serde_json::to_value(value).map_err(transport)
    }
}

impl LedgerService for HttpLedgerClient {
    fn create_wallet(
        &self,
        request: &CreateWalletRequest,
    ) -> Result<CreateWalletResponse, LedgerError> {
        let body = Self::to_value(request)?;
        self.call(Method::POST, &["wallet"], &[], Some(&body))
    }

    fn get_wallet(&self, identifier: &str) -> Result<WalletData, LedgerError> {
        self.call(Method::GET, &["wallet", identifier], &[], None)
    }

    fn upgrade_key_index(
        &self,
        identifier: &str,
        key_index: u32,
        primary_public_key: &KeyWithPath,
    ) -> Result<UpgradeKeyIndexResponse, LedgerError> {
        let body = Self::to_value(&UpgradeKeyIndexRequest {
            key_index,
            primary_public_key: primary_public_key.clone(),
        })?;
        self.call(Method::POST, &["wallet", identifier, "upgrade"], &[], Some(&body))
    }

    fn get_new_derivation(
        &self,
        identifier: &str,
        parent: &DerivationPath,
    ) -> Result<NewDerivation, LedgerError> {
        let body = json!({ "path": parent.to_string() });
        self.call(Method::POST, &["wallet", identifier, "path"], &[], Some(&body))
    }

    fn coin_selection(
        &self,
        identifier: &str,
        outputs: &[Recipient],
        lock_utxos: bool,
        allow_zero_conf: bool,
    ) -> Result<CoinSelection, LedgerError> {
        let body = json!({ "outputs": Self::to_value(&outputs)? });
        self.call(
            Method::POST,
            &["wallet", identifier, "coin-selection"],
            &[("lock", flag(lock_utxos)), ("zeroconf", flag(allow_zero_conf))],
            Some(&body),
        )
        .map_err(LedgerError::into_coin_selection)
    }

    fn send_transaction(
        &self,
        identifier: &str,
        raw_transaction: &str,
        paths: &[DerivationPath],
        check_fee: bool,
    ) -> Result<String, LedgerError> {
        let body = json!({
            "raw_transaction": raw_transaction,
            "paths": Self::to_value(&paths)?,
        });
        let response: SendResponse = self
            .call(
                Method::POST,
                &["wallet", identifier, "send"],
                &[("check_fee", flag(check_fee))],
                Some(&body),
            )
            .map_err(LedgerError::into_transaction_rejected)?;
        Ok(response.txid)
    }

    fn wallet_balance(&self, identifier: &str) -> Result<WalletBalance, LedgerError> {
        self.call(Method::GET, &["wallet", identifier, "balance"], &[], None)
    }

    fn wallet_discovery(&self, identifier: &str, gap: u32) -> Result<WalletBalance, LedgerError> {
        self.call(
            Method::POST,
            &["wallet", identifier, "discovery"],
            &[("gap", gap.to_string())],
            Some(&json!({})),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::content_md5;
    use cosign_core::network::Network;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::thread;

    fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .map(|v| v.trim().parse::<usize>().unwrap())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serve one canned response; the raw request arrives on the channel.
    fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (HttpLedgerClient, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            tx.send(read_request(&mut stream)).unwrap();
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        let config = ApiConfig::new("key", "secret")
            .with_network(Network::Testnet)
            .with_endpoint(format!("http://{addr}/v1/tBTC"));
        (HttpLedgerClient::new(&config).unwrap(), rx)
    }

    fn header<'a>(request: &'a str, name: &str) -> Option<&'a str> {
        request.lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }

    #[test]
    fn get_is_signed_with_empty_body_md5() {
        let (client, rx) = serve_once("200 OK", r#"{"confirmed":5000,"unconfirmed":-20}"#);
        let balance = client.wallet_balance("w1").unwrap();
        assert_eq!(balance, WalletBalance { confirmed: 5000, unconfirmed: -20 });

        let request = rx.recv().unwrap();
        assert!(request.starts_with("GET /v1/tBTC/wallet/w1/balance?api_key=key HTTP/1.1"));
        assert_eq!(header(&request, "content-md5"), Some("d41d8cd98f00b204e9800998ecf8427e"));
        assert!(header(&request, "user-agent").unwrap().starts_with("cosign-sdk-rust/"));
        assert!(
            header(&request, "authorization")
                .unwrap()
                .starts_with("Signature keyId=\"key\",algorithm=\"hmac-sha256\"")
        );
    }

    #[test]
    fn post_signature_covers_body_and_query() {
        let (client, rx) = serve_once("200 OK", r#"{"txid":"ab12"}"#);
        let path: DerivationPath = "M/9999'/0/0".parse().unwrap();
        let txid = client.send_transaction("w1", "0100", &[path], true).unwrap();
        assert_eq!(txid, "ab12");

        let request = rx.recv().unwrap();
        let (head, body) = request.split_once("\r\n\r\n").unwrap();
        let target = "/v1/tBTC/wallet/w1/send?api_key=key&check_fee=1";
        assert!(head.starts_with(&format!("POST {target} HTTP/1.1")));
        let sent: Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent["raw_transaction"], "0100");
        assert_eq!(sent["paths"][0], "M/9999'/0/0");

        let md5 = header(head, "content-md5").unwrap();
        assert_eq!(md5, content_md5(body));
        let signer = RequestSigner::new("key", "secret");
        let expected = signer.authorization(&RequestParts {
            method: "POST",
            path_and_query: target,
            date: header(head, "date").unwrap(),
            content_md5: md5,
        });
        assert_eq!(header(head, "authorization"), Some(expected.as_str()));
    }

    #[test]
    fn verify_address_posts_signed_proof() {
        let (client, rx) = serve_once("200 OK", r#"{"result":true}"#);
        let address = "2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WS";
        let response = client.verify_address(address, "H1b2c3").unwrap();
        assert_eq!(response["result"], true);

        let request = rx.recv().unwrap();
        let (head, body) = request.split_once("\r\n\r\n").unwrap();
        let target = format!("/v1/tBTC/address/{address}/verify?api_key=key");
        assert!(head.starts_with(&format!("POST {target} HTTP/1.1")));
        let sent: Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent, json!({ "signature": "H1b2c3" }));

        let md5 = header(head, "content-md5").unwrap();
        assert_eq!(md5, content_md5(body));
        let expected = RequestSigner::new("key", "secret").authorization(&RequestParts {
            method: "POST",
            path_and_query: &target,
            date: header(head, "date").unwrap(),
            content_md5: md5,
        });
        assert_eq!(header(head, "authorization"), Some(expected.as_str()));
    }

    #[test]
    fn coin_selection_error_is_retagged() {
        let (client, rx) =
            serve_once("400 Bad Request", r#"{"msg":"Wallet balance too low","code":6}"#);
        let recipient =
            Recipient::new("2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WS".parse().unwrap(), 10_000);
        let err = client.coin_selection("w1", &[recipient], true, false).unwrap_err();
        assert_eq!(
            err,
            LedgerError::CoinSelection { code: 6, msg: "Wallet balance too low".into() }
        );
        let request = rx.recv().unwrap();
        assert!(request.contains("coin-selection?api_key=key&lock=1&zeroconf=0"));
    }

    #[test]
    fn unauthorized_maps_to_invalid_credentials() {
        let (client, _rx) = serve_once("401 Unauthorized", "");
        assert_eq!(client.get_wallet("w1").unwrap_err(), LedgerError::InvalidCredentials);
    }

    #[test]
    fn missing_endpoint() {
        let (client, _rx) = serve_once("404 Endpoint Not Found", "Endpoint Not Found");
        assert_eq!(client.wallet_discovery("w1", 20).unwrap_err(), LedgerError::MissingEndpoint);
    }

    #[test]
    fn unknown_wallet_is_object_not_found() {
        let (client, _rx) = serve_once("404 Not Found", r#"{"msg":"wallet not found"}"#);
        assert_eq!(client.get_wallet("nobody").unwrap_err(), LedgerError::ObjectNotFound);
    }

    #[test]
    fn unreachable_host_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let config = ApiConfig::new("k", "s").with_endpoint(format!("http://{addr}"));
        let client = HttpLedgerClient::new(&config).unwrap();
        assert!(matches!(client.wallet_balance("w1"), Err(LedgerError::Transport(_))));
    }
}
