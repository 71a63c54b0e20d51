pub mod dnspod;
pub mod tc3;
