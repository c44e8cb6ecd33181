mod credential_store;
mod renewal;
mod session;
mod transport;

pub use credential_store::{
    CredentialStore, FileBackend, MemoryBackend, StorageBackend, PROFILE_KEYS, TOKEN_KEY,
};
pub use renewal::{RenewalClient, ACCESS_HEADER, REFRESH_COOKIE, REISSUE_PATH};
pub use session::{
    NavigationDecision, OAuthOutcome, Profile, Session, SessionState, LOGIN_PATH, LOGOUT_PATH,
    OAUTH_TOKEN_PATH, PROFILE_PATH,
};
pub use transport::{AuthorizedTransport, PendingRequest, RequestState};
