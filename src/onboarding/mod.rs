// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # First-login provisioning
//!
//! A new user gets an authorization key store, an operational key store
//! backed by an encrypted data vault, a vault for wallet content and the
//! capabilities tying them together. The steps run strictly in order because
//! each consumes identifiers produced by the ones before it:
//!
//! | # | Step | Produces |
//! |---|------|----------|
//! | 1 | create authz keystore | authorization key store URL |
//! | 2 | create authz key | Ed25519 signing key (KMS held) |
//! | 3 | post secret share to auth server | split user secret |
//! | 4 | create edv controller | controller DID of the signing key |
//! | 5 | create key data vault | vault for operational keys + root capability |
//! | 6 | create chain capability | key vault capability delegated to the ops KMS |
//! | 7 | create operational key store | EDV-backed key store |
//! | 8 | create edv operational key | P-256 key-agreement key |
//! | 9 | create edv hmac key | HMAC index key |
//! | 10 | create user edv vault | wallet content vault + root capability |
//! | 11 | create user edv capability | user vault capability delegated to the ops key store |
//! | 12 | update user bootstrap data | bootstrap data posted to the auth server |
//!
//! The run is a cursor over [`Step`] advanced one step at a time. It is
//! fail-fast: the first error stops the run and nothing about it is stored
//! locally. Resources created by earlier steps are left in place.

pub mod secret;

use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use ring::rand::SystemRandom;

use crate::auth_server::{AuthServer, AuthServerError};
use crate::config::BackendSettings;
use crate::credential::UserCredential;
use crate::edv::{CreatedVault, DataVaultConfiguration, EdvError, VaultClient};
use crate::kms::{
    CreateKeyStoreRequest, CreatedKey, EdvBinding, KeyManager, KeyStore, KeyType, KmsError,
    KmsSigner, Signer, SignerError,
};
use crate::models::BootstrapData;
use crate::zcap::{self, Capability, CapabilityError, DelegateOptions};

use secret::SecretError;

/// Provisioning steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    CreateAuthzKeyStore,
    CreateAuthzKey,
    ShareSecret,
    CreateEdvController,
    CreateKeyVault,
    DelegateKeyVault,
    CreateOpsKeyStore,
    CreateOpsKey,
    CreateHmacKey,
    CreateUserVault,
    DelegateUserVault,
    PublishBootstrap,
    Complete,
}

impl Step {
    pub const ALL: [Step; 12] = [
        Step::CreateAuthzKeyStore,
        Step::CreateAuthzKey,
        Step::ShareSecret,
        Step::CreateEdvController,
        Step::CreateKeyVault,
        Step::DelegateKeyVault,
        Step::CreateOpsKeyStore,
        Step::CreateOpsKey,
        Step::CreateHmacKey,
        Step::CreateUserVault,
        Step::DelegateUserVault,
        Step::PublishBootstrap,
    ];

    /// Phrase identifying the step in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            Step::CreateAuthzKeyStore => "create authz keystore",
            Step::CreateAuthzKey => "create authz key",
            Step::ShareSecret => "post secret share to auth server",
            Step::CreateEdvController => "create edv controller",
            Step::CreateKeyVault => "create key data vault",
            Step::DelegateKeyVault => "create chain capability",
            Step::CreateOpsKeyStore => "create operational key store",
            Step::CreateOpsKey => "create edv operational key",
            Step::CreateHmacKey => "create edv hmac key",
            Step::CreateUserVault => "create user edv vault",
            Step::DelegateUserVault => "create user edv capability",
            Step::PublishBootstrap => "update user bootstrap data",
            Step::Complete => "complete",
        }
    }

    fn next(self) -> Step {
        match self {
            Step::CreateAuthzKeyStore => Step::CreateAuthzKey,
            Step::CreateAuthzKey => Step::ShareSecret,
            Step::ShareSecret => Step::CreateEdvController,
            Step::CreateEdvController => Step::CreateKeyVault,
            Step::CreateKeyVault => Step::DelegateKeyVault,
            Step::DelegateKeyVault => Step::CreateOpsKeyStore,
            Step::CreateOpsKeyStore => Step::CreateOpsKey,
            Step::CreateOpsKey => Step::CreateHmacKey,
            Step::CreateHmacKey => Step::CreateUserVault,
            Step::CreateUserVault => Step::DelegateUserVault,
            Step::DelegateUserVault => Step::PublishBootstrap,
            Step::PublishBootstrap | Step::Complete => Step::Complete,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningCause {
    #[error(transparent)]
    Kms(#[from] KmsError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Edv(#[from] EdvError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error(transparent)]
    AuthServer(#[from] AuthServerError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("{0} is not available at this step")]
    MissingOutput(&'static str),
}

/// A failed step. Displays as `"<step phrase>: <cause>"`.
#[derive(Debug, thiserror::Error)]
#[error("{}: {}", .step.label(), .cause)]
pub struct ProvisioningError {
    pub step: Step,
    #[source]
    pub cause: ProvisioningCause,
}

/// Outputs accumulated by a provisioning run.
pub struct ProvisioningRun {
    step: Step,
    credential: UserCredential,
    authz_store: Option<KeyStore>,
    authz_key: Option<CreatedKey>,
    signer: Option<KmsSigner>,
    controller: Option<String>,
    key_vault: Option<CreatedVault>,
    key_vault_capability: Option<Capability>,
    ops_store: Option<KeyStore>,
    ops_key: Option<CreatedKey>,
    hmac_key: Option<CreatedKey>,
    user_vault: Option<CreatedVault>,
    user_vault_capability: Option<Capability>,
    bootstrap: Option<BootstrapData>,
}

impl ProvisioningRun {
    fn new(credential: UserCredential) -> Self {
        Self {
            step: Step::CreateAuthzKeyStore,
            credential,
            authz_store: None,
            authz_key: None,
            signer: None,
            controller: None,
            key_vault: None,
            key_vault_capability: None,
            ops_store: None,
            ops_key: None,
            hmac_key: None,
            user_vault: None,
            user_vault_capability: None,
            bootstrap: None,
        }
    }

    /// Next step to execute.
    pub fn step(&self) -> Step {
        self.step
    }

    pub fn is_complete(&self) -> bool {
        self.step == Step::Complete
    }

    pub fn bootstrap(&self) -> Option<&BootstrapData> {
        self.bootstrap.as_ref()
    }

    pub fn into_bootstrap(self) -> Option<BootstrapData> {
        self.bootstrap
    }
}

fn need<'a, T>(value: &'a Option<T>, what: &'static str) -> Result<&'a T, ProvisioningCause> {
    value.as_ref().ok_or(ProvisioningCause::MissingOutput(what))
}

/// Drives provisioning runs against the backend services.
pub struct Provisioner {
    backends: BackendSettings,
    kms: Arc<dyn KeyManager>,
    key_edv: Arc<dyn VaultClient>,
    user_edv: Arc<dyn VaultClient>,
    auth_server: Arc<dyn AuthServer>,
    rng: SystemRandom,
}

impl Provisioner {
    pub fn new(
        backends: BackendSettings,
        kms: Arc<dyn KeyManager>,
        key_edv: Arc<dyn VaultClient>,
        user_edv: Arc<dyn VaultClient>,
        auth_server: Arc<dyn AuthServer>,
    ) -> Self {
        Self {
            backends,
            kms,
            key_edv,
            user_edv,
            auth_server,
            rng: SystemRandom::new(),
        }
    }

    pub fn start(&self, credential: UserCredential) -> ProvisioningRun {
        ProvisioningRun::new(credential)
    }

    /// Run every step for a new user and return the bootstrap data.
    pub async fn provision(
        &self,
        credential: UserCredential,
    ) -> Result<BootstrapData, ProvisioningError> {
        let sub = credential.sub.clone();
        let mut run = self.start(credential);
        while !run.is_complete() {
            self.advance(&mut run).await?;
        }

        tracing::info!(sub = %sub, "user provisioned");
        run.into_bootstrap().ok_or(ProvisioningError {
            step: Step::PublishBootstrap,
            cause: ProvisioningCause::MissingOutput("bootstrap data"),
        })
    }

    /// Execute the run's current step and move the cursor forward.
    ///
    /// On error the cursor stays on the failed step.
    pub async fn advance(&self, run: &mut ProvisioningRun) -> Result<Step, ProvisioningError> {
        let step = run.step;
        if step == Step::Complete {
            return Ok(step);
        }

        tracing::debug!(sub = %run.credential.sub, step = %step, "provisioning step");
        self.execute(step, run)
            .await
            .map_err(|cause| ProvisioningError { step, cause })?;

        run.step = step.next();
        Ok(run.step)
    }

    async fn execute(&self, step: Step, run: &mut ProvisioningRun) -> Result<(), ProvisioningCause> {
        match step {
            Step::CreateAuthzKeyStore => {
                let request = CreateKeyStoreRequest {
                    controller: run.credential.sub.clone(),
                    edv: None,
                };
                let store = self
                    .kms
                    .create_key_store(&self.backends.authz_kms_url, &request, &run.credential)
                    .await?;
                run.authz_store = Some(store);
            }
            Step::CreateAuthzKey => {
                let store = need(&run.authz_store, "authz key store")?;
                let key = self
                    .kms
                    .create_key(&store.url, KeyType::Ed25519, &run.credential)
                    .await?;
                run.signer = Some(KmsSigner::new(
                    self.kms.clone(),
                    &key,
                    run.credential.clone(),
                ));
                run.authz_key = Some(key);
            }
            Step::ShareSecret => {
                let shares = secret::generate(&self.rng)?;
                let signer = need(&run.signer, "authz signer")?;
                let signature = signer.sign(&shares.server_share).await?;
                self.auth_server
                    .post_secret_share(&shares.server_share, &signature, &run.credential)
                    .await?;

                run.credential = run
                    .credential
                    .clone()
                    .with_secret_share(Base64UrlUnpadded::encode_string(&shares.kms_share));
                let credential = run.credential.clone();
                run.signer = run.signer.take().map(|s| s.with_credential(credential));
            }
            Step::CreateEdvController => {
                let store = need(&run.authz_store, "authz key store")?;
                let key = need(&run.authz_key, "authz key")?;
                let did = self
                    .kms
                    .create_did(&store.url, &key.key_id, &run.credential)
                    .await?;
                run.controller = Some(did);
            }
            Step::CreateKeyVault => {
                let controller = need(&run.controller, "edv controller")?;
                let key = need(&run.authz_key, "authz key")?;
                let config = DataVaultConfiguration::new(controller, &key.key_url, &key.key_url);
                let vault = self
                    .key_edv
                    .create_data_vault(&config, &run.credential)
                    .await?;
                run.key_vault = Some(vault);
            }
            Step::DelegateKeyVault => {
                let vault = need(&run.key_vault, "key data vault")?;
                let invoker = self.backends.ops_kms_url.clone();
                let capability = self.delegate(run, &vault.capability, invoker).await?;
                run.key_vault_capability = Some(capability);
            }
            Step::CreateOpsKeyStore => {
                let controller = need(&run.controller, "edv controller")?;
                let vault = need(&run.key_vault, "key data vault")?;
                let capability = need(&run.key_vault_capability, "key vault capability")?;
                let request = CreateKeyStoreRequest {
                    controller: controller.clone(),
                    edv: Some(EdvBinding {
                        vault_url: vault.url.clone(),
                        capability: capability.to_json()?,
                    }),
                };
                let store = self
                    .kms
                    .create_key_store(&self.backends.ops_kms_url, &request, &run.credential)
                    .await?;
                run.ops_store = Some(store);
            }
            Step::CreateOpsKey => {
                let store = need(&run.ops_store, "operational key store")?;
                let key = self
                    .kms
                    .create_key(&store.url, KeyType::NistP256EcdhKw, &run.credential)
                    .await?;
                run.ops_key = Some(key);
            }
            Step::CreateHmacKey => {
                let store = need(&run.ops_store, "operational key store")?;
                let key = self
                    .kms
                    .create_key(&store.url, KeyType::HmacSha256Tag256, &run.credential)
                    .await?;
                run.hmac_key = Some(key);
            }
            Step::CreateUserVault => {
                let controller = need(&run.controller, "edv controller")?;
                let ops_key = need(&run.ops_key, "operational key")?;
                let hmac_key = need(&run.hmac_key, "hmac key")?;
                let config =
                    DataVaultConfiguration::new(controller, &ops_key.key_url, &hmac_key.key_url);
                let vault = self
                    .user_edv
                    .create_data_vault(&config, &run.credential)
                    .await?;
                run.user_vault = Some(vault);
            }
            Step::DelegateUserVault => {
                let vault = need(&run.user_vault, "user data vault")?;
                let invoker = need(&run.ops_store, "operational key store")?.url.clone();
                let capability = self.delegate(run, &vault.capability, invoker).await?;
                run.user_vault_capability = Some(capability);
            }
            Step::PublishBootstrap => {
                let data = BootstrapData {
                    authz_key_store_url: need(&run.authz_store, "authz key store")?.url.clone(),
                    ops_key_store_url: need(&run.ops_store, "operational key store")?.url.clone(),
                    user_edv_vault_url: need(&run.user_vault, "user data vault")?.url.clone(),
                    ops_edv_vault_url: need(&run.key_vault, "key data vault")?.url.clone(),
                    edv_ops_kid_url: need(&run.ops_key, "operational key")?.key_url.clone(),
                    edv_hmac_kid_url: need(&run.hmac_key, "hmac key")?.key_url.clone(),
                    user_edv_capability: need(&run.user_vault_capability, "user vault capability")?
                        .to_json()?,
                };
                self.auth_server
                    .post_bootstrap_data(&run.credential, &data)
                    .await?;
                run.bootstrap = Some(data);
            }
            Step::Complete => {}
        }
        Ok(())
    }

    /// Delegate a vault's root capability to `invoker` with the authz key.
    async fn delegate(
        &self,
        run: &ProvisioningRun,
        root_capability: &[u8],
        invoker: String,
    ) -> Result<Capability, ProvisioningCause> {
        let signer = need(&run.signer, "authz signer")?;
        let controller = need(&run.controller, "edv controller")?;
        let key = need(&run.authz_key, "authz key")?;

        let root = Capability::parse(root_capability)?;
        let options = DelegateOptions {
            invoker,
            allowed_actions: Vec::new(),
            expires: None,
            verification_method: format!("{controller}#{}", key.key_id),
        };
        Ok(zcap::delegate(&root, &options, signer as &dyn Signer).await?)
    }
}
