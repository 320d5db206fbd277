use crate::limits::LimitService;
use crate::transfer::TransferService;
use crate::wallet::WalletService;

/// Shared gateway state
pub struct AppState {
    pub transfers: TransferService,
    pub wallets: WalletService,
    pub limits: LimitService,
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(
        transfers: TransferService,
        wallets: WalletService,
        limits: LimitService,
        jwt_secret: String,
    ) -> Self {
        Self {
            transfers,
            wallets,
            limits,
            jwt_secret,
        }
    }
}
