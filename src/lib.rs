// Encrypted at-rest token storage
pub mod credentials;

// Authenticated request pipeline (attach, refresh, retry)
pub mod session;
