//! EVM implementation of the ledger gateway, backed by the Gaia task manager contract.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt::{self, Debug};

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, TxHash};
use alloy::rpc::json_rpc::ErrorPayload;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::RpcError;
use async_trait::async_trait;
use gaia_ledger_gateway::{
    CommitResult, Confirmation, LedgerGateway, PendingHandle, TaskId, TaskStatusRecord,
};
use tracing::debug;
use url::Url;

// JSON-RPC error code nodes use for a reverted call
const EXECUTION_REVERTED_CODE: i64 = 3;

// Bindings for the task manager contract
sol! {
    #[sol(rpc)]
    contract GaiaTaskManager {
        event GaiaNodeStarted(uint32 indexed taskId, string network, string dataDir);
        event GaiaNodeStopped(uint32 indexed taskId);

        function startGaiaNode(string memory network, string memory dataDir) external returns (uint32);
        function stopGaiaNode(uint32 taskId) external;
        function latestTaskNum() external view returns (uint32);
        function getGaiaNodeStatus(uint32 taskId) external view returns (bool isRunning, uint256 uptime, address operator);
    }
}

/// Configuration options for the EVM gateway.
#[derive(Clone)]
pub struct EvmLedgerGatewayOptions {
    /// The address of the task manager contract.
    pub contract_address: String,

    /// Hex-encoded secp256k1 key used to sign transactions.
    pub private_key: String,

    /// Number of blocks that must include a transaction before it counts as confirmed.
    pub required_confirmations: u64,

    /// The URL of the execution layer JSON-RPC endpoint.
    pub rpc_url: Url,
}

impl Debug for EvmLedgerGatewayOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmLedgerGatewayOptions")
            .field("contract_address", &self.contract_address)
            .field("private_key", &"<redacted>")
            .field("required_confirmations", &self.required_confirmations)
            .field("rpc_url", &self.rpc_url.as_str())
            .finish()
    }
}

/// A ledger gateway that signs and sends transactions to the task manager contract over JSON-RPC.
#[derive(Clone)]
pub struct EvmLedgerGateway {
    contract_address: Address,
    identity: Address,
    provider: DynProvider,
    required_confirmations: u64,
}

impl Debug for EvmLedgerGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmLedgerGateway")
            .field("contract_address", &self.contract_address)
            .field("identity", &self.identity)
            .field("required_confirmations", &self.required_confirmations)
            .finish_non_exhaustive()
    }
}

impl EvmLedgerGateway {
    /// Create a new EVM gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The private key cannot be parsed
    /// - The contract address cannot be parsed
    pub fn new(options: EvmLedgerGatewayOptions) -> Result<Self, Error> {
        let signer = options
            .private_key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| Error::InvalidPrivateKey(e.to_string()))?;
        let identity = signer.address();

        let contract_address = options
            .contract_address
            .trim()
            .parse::<Address>()
            .map_err(|e| Error::InvalidAddress(format!("contract_address: {e}")))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(options.rpc_url)
            .erased();

        debug!("submitting to task manager {contract_address} as {identity}");

        Ok(Self {
            contract_address,
            identity,
            provider,
            required_confirmations: options.required_confirmations.max(1),
        })
    }

    fn contract(&self) -> GaiaTaskManager::GaiaTaskManagerInstance<DynProvider> {
        GaiaTaskManager::new(self.contract_address, self.provider.clone())
    }

    /// Whether a receipt included at `block_number` has enough confirmations.
    async fn is_deep_enough(&self, block_number: u64) -> Result<bool, Error> {
        if self.required_confirmations <= 1 {
            return Ok(true);
        }

        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(Error::from_rpc)?;

        Ok(head.saturating_sub(block_number) + 1 >= self.required_confirmations)
    }
}

#[async_trait]
impl LedgerGateway for EvmLedgerGateway {
    type Error = Error;

    async fn submit_start(
        &self,
        network: &str,
        data_dir: &str,
    ) -> Result<PendingHandle, Self::Error> {
        let pending = self
            .contract()
            .startGaiaNode(network.to_string(), data_dir.to_string())
            .send()
            .await
            .map_err(Error::from_contract)?;

        Ok(PendingHandle::new(pending.tx_hash().to_string()))
    }

    async fn submit_stop(&self, task_id: TaskId) -> Result<PendingHandle, Self::Error> {
        let pending = self
            .contract()
            .stopGaiaNode(task_id.get())
            .send()
            .await
            .map_err(Error::from_contract)?;

        Ok(PendingHandle::new(pending.tx_hash().to_string()))
    }

    async fn poll_confirmation(&self, handle: &PendingHandle) -> Result<Confirmation, Self::Error> {
        let tx_hash = handle
            .as_str()
            .parse::<TxHash>()
            .map_err(|_| Error::InvalidHandle(handle.to_string()))?;

        let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(Error::from_rpc)?
        else {
            return Ok(Confirmation::Pending);
        };

        let Some(block_number) = receipt.block_number else {
            return Ok(Confirmation::Pending);
        };

        if !self.is_deep_enough(block_number).await? {
            return Ok(Confirmation::Pending);
        }

        if !receipt.status() {
            return Ok(Confirmation::Reverted(format!(
                "transaction {tx_hash} reverted in block {block_number}"
            )));
        }

        // Only a start emits GaiaNodeStarted; for a stop this stays empty
        let task_id = receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == self.contract_address)
            .find_map(|log| log.log_decode::<GaiaTaskManager::GaiaNodeStarted>().ok())
            .map(|log| TaskId::new(log.inner.data.taskId));

        Ok(Confirmation::Committed(CommitResult {
            block_number: Some(block_number),
            task_id,
        }))
    }

    async fn query_latest_task_id(&self) -> Result<Option<TaskId>, Self::Error> {
        let latest = self
            .contract()
            .latestTaskNum()
            .call()
            .await
            .map_err(Error::from_contract)?;

        // Task numbers start at 1, so 0 means nothing was ever started
        Ok((latest != 0).then(|| TaskId::new(latest)))
    }

    async fn query_status(&self, task_id: TaskId) -> Result<TaskStatusRecord, Self::Error> {
        let status = match self
            .contract()
            .getGaiaNodeStatus(task_id.get())
            .call()
            .await
        {
            Ok(status) => status,
            Err(alloy::contract::Error::TransportError(RpcError::ErrorResp(payload)))
                if is_revert(&payload) =>
            {
                debug!("status call for task {task_id} reverted: {payload}");
                return Ok(TaskStatusRecord::missing());
            }
            Err(e) => return Err(Error::from_contract(e)),
        };

        if status.operator == Address::ZERO {
            return Ok(TaskStatusRecord::missing());
        }

        Ok(TaskStatusRecord {
            exists: true,
            is_running: status.isRunning,
            uptime_seconds: u64::try_from(status.uptime).unwrap_or(u64::MAX),
            operator: status.operator.to_string(),
        })
    }

    fn identity(&self) -> String {
        self.identity.to_string()
    }
}

/// Whether a JSON-RPC error response reports an EVM revert rather than a node failure.
fn is_revert(payload: &ErrorPayload) -> bool {
    payload.code == EXECUTION_REVERTED_CODE
        || payload.as_revert_data().is_some()
        || payload.message.contains("execution reverted")
}
