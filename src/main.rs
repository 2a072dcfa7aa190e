use {
    axum::{
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    },
    base64::{engine::general_purpose::STANDARD, Engine as _},
    chrono::Local,
    serde::{Deserialize, Serialize},
    solana_rpc_client::nonblocking::rpc_client::RpcClient,
    solana_sdk::transaction::VersionedTransaction,
    std::{sync::Arc, time::Instant},
    thiserror::Error,
    tower_http::trace::TraceLayer,
    tpu_proxy::engine::{ProxyConfig, ProxyError, Result, SendStatus, TpuProxy},
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3001";

struct AppState {
    tpu_proxy: TpuProxy,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum TransactionEncoding {
    #[default]
    Base64,
    Base58,
}

#[derive(Deserialize, Debug)]
struct TransactionRequest {
    txn: String,
    #[serde(default)]
    encoding: TransactionEncoding,
}

#[derive(Serialize, Debug)]
struct TransactionResponse {
    status: &'static str,
    signature: String,
    fanout: usize,
    processing_time_us: u64,
}

#[derive(Serialize, Debug)]
struct HealthResponse {
    connected: bool,
    active_proxies: usize,
    slot: u64,
    blockhash: String,
    leader_tpus: usize,
}

#[derive(Error, Debug)]
enum ApiError {
    #[error("invalid {0:?} payload: {1}")]
    InvalidEncoding(TransactionEncoding, String),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] bincode::Error),
    #[error("transaction has no signature")]
    Unsigned,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self, "Rejected transaction request");
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "status": "error",
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(tracing_subscriber::fmt::time::time())
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let rpc_url = std::env::var("RPC_URL")
        .map_err(|_| ProxyError::InvalidConfig("RPC_URL must be set".to_string()))?;
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let config = ProxyConfig::from_env()?;
    info!(?config, %rpc_url, "Starting TPU proxy");

    let rpc_client = Arc::new(RpcClient::new(rpc_url));
    let tpu_proxy = TpuProxy::create(rpc_client, config).await?;
    info!(
        active_proxies = tpu_proxy.active_proxies(),
        slot = tpu_proxy.current_slot(),
        "TPU proxy ready"
    );

    let state = Arc::new(AppState { tpu_proxy });
    let app = Router::new()
        .route("/", get(get_time))
        .route("/health", get(get_health))
        .route("/send_txn", post(handle_transaction))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "Failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

async fn handle_transaction(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TransactionRequest>,
) -> std::result::Result<Json<TransactionResponse>, ApiError> {
    let start_time = Instant::now();
    let wire_transaction = decode_transaction(&request.txn, request.encoding)?;
    let transaction: VersionedTransaction = bincode::deserialize(&wire_transaction)?;
    let signature = transaction
        .signatures
        .first()
        .ok_or(ApiError::Unsigned)?
        .to_string();

    let (status, fanout) = match state.tpu_proxy.send_raw_transaction(&wire_transaction).await {
        SendStatus::Forwarded { fanout } => ("forwarded", fanout),
        SendStatus::Dropped => ("dropped", 0),
    };
    let processing_time_us = start_time.elapsed().as_micros() as u64;
    info!(
        %signature,
        transaction_size = wire_transaction.len(),
        status,
        fanout,
        processing_time_us,
        "Transaction request handled"
    );

    Ok(Json(TransactionResponse {
        status,
        signature,
        fanout,
        processing_time_us,
    }))
}

fn decode_transaction(
    payload: &str,
    encoding: TransactionEncoding,
) -> std::result::Result<Vec<u8>, ApiError> {
    match encoding {
        TransactionEncoding::Base64 => STANDARD
            .decode(payload)
            .map_err(|err| ApiError::InvalidEncoding(encoding, err.to_string())),
        TransactionEncoding::Base58 => bs58::decode(payload)
            .into_vec()
            .map_err(|err| ApiError::InvalidEncoding(encoding, err.to_string())),
    }
}

async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let proxy_state = state.tpu_proxy.state();
    Json(HealthResponse {
        connected: state.tpu_proxy.connected(),
        active_proxies: state.tpu_proxy.active_proxies(),
        slot: proxy_state.slot,
        blockhash: proxy_state.cur_blockhash.to_string(),
        leader_tpus: proxy_state.tpu_addresses.len(),
    })
}

async fn get_time() -> impl IntoResponse {
    let current_time = Local::now().to_rfc3339();
    Json(serde_json::json!({
        "time": current_time
    }))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        solana_sdk::{
            hash::Hash, signature::Keypair, signer::Signer, system_transaction,
        },
    };

    fn wire_transaction() -> (Vec<u8>, String) {
        let payer = Keypair::new();
        let transaction =
            system_transaction::transfer(&payer, &payer.pubkey(), 1, Hash::new_unique());
        let signature = transaction.signatures[0].to_string();
        (bincode::serialize(&transaction).unwrap(), signature)
    }

    #[test]
    fn test_decode_base64_and_base58() {
        let (wire, signature) = wire_transaction();

        let decoded = decode_transaction(&STANDARD.encode(&wire), TransactionEncoding::Base64)
            .unwrap();
        assert_eq!(decoded, wire);

        let decoded = decode_transaction(
            &bs58::encode(&wire).into_string(),
            TransactionEncoding::Base58,
        )
        .unwrap();
        assert_eq!(decoded, wire);

        let transaction: VersionedTransaction = bincode::deserialize(&decoded).unwrap();
        assert_eq!(transaction.signatures[0].to_string(), signature);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(matches!(
            decode_transaction("not base64!", TransactionEncoding::Base64),
            Err(ApiError::InvalidEncoding(TransactionEncoding::Base64, _))
        ));
        assert!(matches!(
            decode_transaction("0OIl", TransactionEncoding::Base58),
            Err(ApiError::InvalidEncoding(TransactionEncoding::Base58, _))
        ));
    }

    #[test]
    fn test_request_encoding_defaults_to_base64() {
        let request: TransactionRequest = serde_json::from_str(r#"{"txn":"AA=="}"#).unwrap();
        assert_eq!(request.encoding, TransactionEncoding::Base64);

        let request: TransactionRequest =
            serde_json::from_str(r#"{"txn":"1","encoding":"base58"}"#).unwrap();
        assert_eq!(request.encoding, TransactionEncoding::Base58);
    }

    #[test]
    fn test_bad_request_status() {
        let response = ApiError::Unsigned.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
