use actix_web::{web, HttpResponse, Responder};
use log::{error, info};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::blockchain::{AccountKey, Block, Blockchain, LedgerError, Transaction, Wallet};

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// How `/mine` seals blocks, shared across workers
///
/// Every parallel run gets its own cancel flag, registered until the run
/// finishes. `/mine/cancel` raises the flags of the runs registered at that
/// moment, so it never reaches a run started afterwards.
#[derive(Debug, Clone, Default)]
pub struct MiningControl {
    /// Seal on the rayon pool and honour cancellation
    pub parallel: bool,

    runs: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl MiningControl {
    pub fn new(parallel: bool) -> Self {
        MiningControl {
            parallel,
            ..MiningControl::default()
        }
    }

    /// Registers a new run and returns its cancel flag
    fn begin_run(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.lock_runs().push(flag.clone());
        flag
    }

    fn end_run(&self, flag: &Arc<AtomicBool>) {
        self.lock_runs().retain(|run| !Arc::ptr_eq(run, flag));
    }

    /// Raises the cancel flag of every registered run
    ///
    /// # Returns
    ///
    /// The number of runs signalled
    pub fn cancel_all(&self) -> usize {
        let runs = self.lock_runs();
        for run in runs.iter() {
            run.store(true, Ordering::SeqCst);
        }
        runs.len()
    }

    fn lock_runs(&self) -> MutexGuard<'_, Vec<Arc<AtomicBool>>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub type MiningData = web::Data<MiningControl>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The recipient's account key (base58)
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The sender's secret key (hex), used for signing
    pub private_key: String,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The admitted transaction
    pub transaction: Transaction,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The miner's account key (base58)
    pub miner_key: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    /// Whether the chain is valid
    pub is_valid: bool,

    /// The first rule broken, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<String>,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's short address
    pub address: String,

    /// The wallet's account key (base58 verification key)
    pub account_key: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Response for the balance endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub account_key: String,
    pub address: String,
    pub balance: f64,
}

/// Request and response body for the difficulty endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DifficultyBody {
    pub difficulty: usize,
}

fn error_body(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(blockchain: BlockchainData) -> impl Responder {
    let chain = blockchain.get_chain();
    let is_valid = blockchain.is_valid();

    let response = ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> impl Responder {
    let blockchain = blockchain.get_ref().clone();

    // The pending pool stays locked while a block is sealed.
    match web::block(move || blockchain.get_pending_transactions()).await {
        Ok(pending) => HttpResponse::Ok().json(pending),
        Err(err) => {
            error!("Pending snapshot failed: {}", err);
            HttpResponse::InternalServerError().json(error_body("Pending snapshot failed".to_string()))
        }
    }
}

/// Create a new transaction
///
/// Signs a transfer with the supplied secret key and admits it to the pending pool
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction admitted", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data or insufficient funds"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn new_transaction(
    blockchain: BlockchainData,
    transaction_req: web::Json<TransactionRequest>,
) -> impl Responder {
    let recipient: AccountKey = match transaction_req.recipient.parse() {
        Ok(key) => key,
        Err(err) => {
            return HttpResponse::BadRequest()
                .json(error_body(format!("Invalid recipient: {}", err)));
        }
    };

    let private_key_bytes = match hex::decode(&transaction_req.private_key) {
        Ok(bytes) => bytes,
        Err(_) => {
            return HttpResponse::BadRequest().json(error_body(
                "Invalid private key format. Must be a hex string.".to_string(),
            ));
        }
    };

    let wallet = match Wallet::from_secret_key(&private_key_bytes) {
        Ok(wallet) => wallet,
        Err(err) => {
            let err = LedgerError::from(err);
            return HttpResponse::BadRequest().json(error_body(err.to_string()));
        }
    };

    let transaction = match wallet.send_funds(&recipient, transaction_req.amount) {
        Ok(transaction) => transaction,
        Err(err) => {
            return HttpResponse::BadRequest()
                .json(error_body(format!("Failed to sign transaction: {}", err)));
        }
    };

    let blockchain = blockchain.get_ref().clone();
    let admitted = transaction.clone();

    // Admission waits on the pending pool, which mining holds while sealing.
    match web::block(move || blockchain.add_transaction(admitted)).await {
        Ok(Ok(())) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction will be added to the next block".to_string(),
            transaction,
        }),
        Ok(Err(err)) => HttpResponse::BadRequest()
            .json(error_body(format!("Failed to add transaction: {}", err))),
        Err(err) => {
            error!("Admission task failed: {}", err);
            HttpResponse::InternalServerError().json(error_body("Admission task failed".to_string()))
        }
    }
}

/// Mine a new block
///
/// Seals the pending transactions plus a reward for the miner into a new block
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid miner key"),
        (status = 409, description = "Mining was cancelled"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(
    blockchain: BlockchainData,
    mining: MiningData,
    mine_req: web::Json<MineRequest>,
) -> impl Responder {
    let miner: AccountKey = match mine_req.miner_key.parse() {
        Ok(key) => key,
        Err(err) => {
            return HttpResponse::BadRequest().json(error_body(format!("Invalid miner key: {}", err)));
        }
    };

    let blockchain = blockchain.get_ref().clone();
    let control = mining.get_ref().clone();

    // Sealing is CPU bound; keep it off the async workers.
    let result = web::block(move || {
        if control.parallel {
            let cancel = control.begin_run();
            let mined = blockchain.mine_pending_transactions_parallel(&miner, &cancel);
            control.end_run(&cancel);
            mined
        } else {
            Ok(blockchain.mine_pending_transactions(&miner))
        }
    })
    .await;

    match result {
        Ok(Ok(block)) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block,
        }),
        Ok(Err(err)) => HttpResponse::Conflict().json(error_body(format!("Failed to mine block: {}", err))),
        Err(err) => {
            error!("Mining task failed: {}", err);
            HttpResponse::InternalServerError().json(error_body("Mining task failed".to_string()))
        }
    }
}

/// Cancel mining
///
/// Stops the parallel mining runs in flight or waiting for the pending pool;
/// has no effect on sequential mining
#[utoipa::path(
    post,
    path = "/api/v1/mine/cancel",
    responses(
        (status = 202, description = "Cancellation requested")
    )
)]
pub async fn cancel_mining(mining: MiningData) -> impl Responder {
    let cancelled = mining.cancel_all();
    info!("Mining cancellation requested for {} run(s)", cancelled);
    HttpResponse::Accepted().json(serde_json::json!({
        "parallel": mining.parallel,
        "cancelled": cancelled,
    }))
}

/// Check if the blockchain is valid
///
/// Validates the entire blockchain and names the first broken rule
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> impl Responder {
    let response = match blockchain.validate() {
        Ok(()) => ValidationResponse {
            is_valid: true,
            violation: None,
        },
        Err(violation) => ValidationResponse {
            is_valid: false,
            violation: Some(violation.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address(),
        account_key: wallet.account_key().0.clone(),
        private_key: hex::encode(wallet.export_secret_key()),
    })
}

/// Get wallet balance
///
/// Replays the chain to compute the balance of an account
#[utoipa::path(
    get,
    path = "/api/v1/wallet/balance/{account_key}",
    params(
        ("account_key" = String, Path, description = "Base58 account key")
    ),
    responses(
        (status = 200, description = "Wallet balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "Invalid account key")
    )
)]
pub async fn get_wallet_balance(
    blockchain: BlockchainData,
    account_key: web::Path<String>,
) -> impl Responder {
    let account: AccountKey = match account_key.into_inner().parse() {
        Ok(key) => key,
        Err(err) => {
            return HttpResponse::BadRequest().json(error_body(format!("Invalid account key: {}", err)));
        }
    };

    HttpResponse::Ok().json(BalanceResponse {
        balance: blockchain.get_balance(&account),
        address: account.address(),
        account_key: account.0,
    })
}

/// Get the mining difficulty
#[utoipa::path(
    get,
    path = "/api/v1/difficulty",
    responses(
        (status = 200, description = "Current difficulty", body = DifficultyBody)
    )
)]
pub async fn get_difficulty(blockchain: BlockchainData) -> impl Responder {
    HttpResponse::Ok().json(DifficultyBody {
        difficulty: blockchain.get_difficulty(),
    })
}

/// Set the mining difficulty
///
/// Applies to blocks mined afterwards; validation also uses the new value
#[utoipa::path(
    put,
    path = "/api/v1/difficulty",
    request_body = DifficultyBody,
    responses(
        (status = 200, description = "Difficulty updated", body = DifficultyBody),
        (status = 400, description = "Difficulty longer than a hash")
    )
)]
pub async fn set_difficulty(
    blockchain: BlockchainData,
    body: web::Json<DifficultyBody>,
) -> impl Responder {
    if let Err(err) = blockchain.set_difficulty(body.difficulty) {
        return HttpResponse::BadRequest().json(error_body(err.to_string()));
    }

    HttpResponse::Ok().json(DifficultyBody {
        difficulty: blockchain.get_difficulty(),
    })
}
