//! Security commands

use serde::Deserialize;
use serde_json::Value;

use super::protocol::CommandError;
use super::{parse_params, to_data, AppContext};
use crate::config::PersistedAppConfig;
use crate::security::{self, EncryptedBlob, HashAlgorithm};

const DEFAULT_RANDOM_LENGTH: usize = 32;

#[derive(Debug, Deserialize)]
struct EncryptParams {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptParams {
    encrypted_data: EncryptedBlob,
}

#[derive(Debug, Deserialize)]
struct SaveConfigParams {
    config: PersistedAppConfig,
}

#[derive(Debug, Deserialize)]
struct HashPasswordParams {
    password: String,
    #[serde(default)]
    salt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyPasswordParams {
    password: String,
    hash: String,
    salt: String,
}

#[derive(Debug, Deserialize)]
struct ComputeHashParams {
    data: String,
    #[serde(default)]
    algorithm: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RandomStringParams {
    #[serde(default)]
    length: Option<usize>,
}

pub(super) fn encrypt_data(ctx: &AppContext, params: Value) -> Result<Value, CommandError> {
    let params: EncryptParams = parse_params(params)?;
    to_data(&ctx.security.encrypt_data(&params.data)?)
}

pub(super) fn decrypt_data(ctx: &AppContext, params: Value) -> Result<Value, CommandError> {
    let params: DecryptParams = parse_params(params)?;
    Ok(Value::String(ctx.security.decrypt_data(&params.encrypted_data)?))
}

pub(super) fn save_config(ctx: &AppContext, params: Value) -> Result<Value, CommandError> {
    let params: SaveConfigParams = parse_params(params)?;
    ctx.security.secure_store_config(&params.config)?;
    Ok(Value::Null)
}

pub(super) fn load_config(ctx: &AppContext) -> Result<Value, CommandError> {
    to_data(&ctx.security.load_config())
}

pub(super) fn clear_all_data(ctx: &AppContext) -> Result<Value, CommandError> {
    to_data(&ctx.security.clear_all_data())
}

pub(super) fn security_info(ctx: &AppContext) -> Result<Value, CommandError> {
    to_data(&ctx.security.security_info())
}

pub(super) fn hash_password(params: Value) -> Result<Value, CommandError> {
    let params: HashPasswordParams = parse_params(params)?;
    to_data(&security::hash_password(&params.password, params.salt.as_deref()))
}

pub(super) fn verify_password(params: Value) -> Result<Value, CommandError> {
    let params: VerifyPasswordParams = parse_params(params)?;
    Ok(Value::Bool(security::verify_password(
        &params.password,
        &params.hash,
        &params.salt,
    )))
}

pub(super) fn compute_hash(params: Value) -> Result<Value, CommandError> {
    let params: ComputeHashParams = parse_params(params)?;
    let algorithm = match params.algorithm.as_deref() {
        Some(name) => name.parse::<HashAlgorithm>()?,
        None => HashAlgorithm::default(),
    };
    Ok(Value::String(security::compute_hash(&params.data, algorithm)))
}

pub(super) fn generate_random_string(params: Value) -> Result<Value, CommandError> {
    let params: RandomStringParams = if params.is_null() {
        RandomStringParams::default()
    } else {
        parse_params(params)?
    };
    let length = params.length.unwrap_or(DEFAULT_RANDOM_LENGTH);
    Ok(Value::String(security::generate_random_string(length)))
}
