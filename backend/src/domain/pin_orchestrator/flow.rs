//! Step sequences for each request kind.

use tracing::warn;

use super::{
    AddFileRequest, Compensation, ContentHash, Credits, Error, ExtendOutcome, ExtendRequest,
    NetworkName, PinOrchestrator, PinOutcome, PinRequest, PinState, Publication, Run, Username,
    map_ledger_error, map_merge_error, map_pricing_error, map_retention_error, map_upload_error,
    map_usage_error,
};
use crate::domain::ports::{OwnershipReservation, UploadRepositoryError, UsageMeterError};
use crate::domain::{AccountUsage, Tier, UploadKind};

/// Outcome of the idempotency guard.
enum Guard {
    Owned,
    Reserved,
}

impl PinOrchestrator {
    pub(super) async fn pin_steps(
        &self,
        request: &PinRequest,
        run: &mut Run,
    ) -> Result<PinOutcome, Error> {
        let hold_months = self
            .policy
            .retention
            .validate_hold_months(request.hold_months)
            .map_err(|err| map_retention_error(&err))?;

        if let Guard::Owned = self
            .guard(run, &request.username, &request.hash, &request.network)
            .await?
        {
            return Ok(PinOutcome::AlreadyOwned {
                hash: request.hash.clone(),
            });
        }

        let usage = self.account_usage(&request.username).await?;
        let quote = self
            .calculator
            .quote_content(self.ports.store.as_ref(), usage.tier, &request.hash, hold_months)
            .await
            .map_err(|err| map_pricing_error(&err))?;
        run.advance(PinState::Priced);

        self.charge(run, &usage, quote.size_bytes, quote.cost).await?;
        self.publish(
            run,
            &Publication {
                username: &request.username,
                hash: &request.hash,
                network: &request.network,
                hold_months,
                size_bytes: quote.size_bytes,
                cost: quote.cost,
                kind: UploadKind::Pin,
                encrypted: false,
            },
        )
        .await?;

        Ok(PinOutcome::Published {
            hash: request.hash.clone(),
            cost: quote.cost,
            size_bytes: quote.size_bytes,
        })
    }

    pub(super) async fn extend_steps(
        &self,
        request: &ExtendRequest,
        run: &mut Run,
    ) -> Result<ExtendOutcome, Error> {
        let months = self
            .policy
            .retention
            .validate_hold_months(request.months)
            .map_err(|err| map_retention_error(&err))?;

        let usage = self.account_usage(&request.username).await?;
        if usage.tier == Tier::Free {
            return Err(Error::forbidden("free tier accounts cannot extend pins"));
        }

        let record = self
            .ports
            .uploads
            .find_owned(&request.username, &request.hash, &request.network)
            .await
            .map_err(|err| map_upload_error(&err))?
            .ok_or_else(|| Error::upload_not_found("no upload found for this content"))?;

        self.policy
            .retention
            .extended_deadline(record.created_at, record.gc_deadline, months)
            .map_err(|err| map_retention_error(&err))?;

        let quote = self
            .calculator
            .quote_content(self.ports.store.as_ref(), usage.tier, &request.hash, months)
            .await
            .map_err(|err| map_pricing_error(&err))?;
        run.advance(PinState::Priced);

        self.charge(run, &usage, quote.size_bytes, quote.cost).await?;

        let extended = self
            .reconciler
            .extend_retention(&request.hash, &request.network, months)
            .await
            .map_err(|err| match &err {
                UploadRepositoryError::Rejected { reason } => map_merge_error(reason),
                other => Error::pin_extend_failed(format!("failed to extend retention: {other}")),
            })?;
        run.advance(PinState::Published);

        Ok(ExtendOutcome {
            cost: quote.cost,
            gc_deadline: extended.gc_deadline,
        })
    }

    pub(super) async fn add_file_steps(
        &self,
        request: &AddFileRequest,
        run: &mut Run,
    ) -> Result<PinOutcome, Error> {
        let size_bytes = u64::try_from(request.bytes.len())
            .map_err(|_| Error::invalid_request("file size is not representable"))?;
        if size_bytes > self.policy.max_upload_bytes {
            return Err(Error::invalid_request("file exceeds the maximum upload size")
                .with_details(serde_json::json!({
                    "size_bytes": size_bytes,
                    "max_bytes": self.policy.max_upload_bytes,
                })));
        }
        let hold_months = self
            .policy
            .retention
            .validate_hold_months(request.hold_months)
            .map_err(|err| map_retention_error(&err))?;

        let hash = self
            .ports
            .store
            .add(&request.bytes, true)
            .await
            .map_err(|err| Error::storage_add_failed(format!("failed to hash content: {err}")))?;

        if let Guard::Owned = self
            .guard(run, &request.username, &hash, &request.network)
            .await?
        {
            return Ok(PinOutcome::AlreadyOwned { hash });
        }

        let usage = self.account_usage(&request.username).await?;
        let cost = self
            .calculator
            .cost(usage.tier, size_bytes, hold_months)
            .map_err(|err| map_pricing_error(&err))?;
        run.advance(PinState::Priced);

        self.charge(run, &usage, size_bytes, cost).await?;

        let stored = self
            .ports
            .store
            .add(&request.bytes, false)
            .await
            .map_err(|err| Error::storage_add_failed(format!("failed to store content: {err}")))?;
        if stored != hash {
            warn!(expected = %hash, stored = %stored, "storage engine returned a different hash");
        }

        self.publish(
            run,
            &Publication {
                username: &request.username,
                hash: &hash,
                network: &request.network,
                hold_months,
                size_bytes,
                cost,
                kind: UploadKind::File,
                encrypted: request.encrypted,
            },
        )
        .await?;

        Ok(PinOutcome::Published {
            hash,
            cost,
            size_bytes,
        })
    }

    /// Short-circuit content the user already owns, otherwise reserve it.
    async fn guard(
        &self,
        run: &mut Run,
        username: &Username,
        hash: &ContentHash,
        network: &NetworkName,
    ) -> Result<Guard, Error> {
        let uploads = &self.ports.uploads;
        let existing = uploads
            .find_owned(username, hash, network)
            .await
            .map_err(|err| map_upload_error(&err))?;
        if existing.is_some() {
            run.advance(PinState::Deduplicated);
            return Ok(Guard::Owned);
        }

        match uploads
            .reserve_ownership(username, hash, network)
            .await
            .map_err(|err| map_upload_error(&err))?
        {
            OwnershipReservation::AlreadyOwned => {
                run.advance(PinState::Deduplicated);
                Ok(Guard::Owned)
            }
            OwnershipReservation::Reserved => {
                run.record(Compensation::ReleaseOwnership {
                    username: username.clone(),
                    hash: hash.clone(),
                    network: network.clone(),
                });
                Ok(Guard::Reserved)
            }
        }
    }

    async fn account_usage(&self, username: &Username) -> Result<AccountUsage, Error> {
        self.ports
            .usage
            .find_usage(username)
            .await
            .map_err(|err| map_usage_error(&err))
    }

    /// Cap check, debit, then usage commit; each committed step is recorded.
    async fn charge(
        &self,
        run: &mut Run,
        usage: &AccountUsage,
        size_bytes: u64,
        cost: Credits,
    ) -> Result<(), Error> {
        let username = &usage.username;
        self.ports
            .usage
            .can_upload(username, size_bytes)
            .await
            .map_err(|err| map_usage_error(&err))?;

        self.ports
            .ledger
            .debit(username, cost)
            .await
            .map_err(|err| map_ledger_error(&err))?;
        run.record(Compensation::RefundCredits {
            username: username.clone(),
            amount: cost,
        });
        run.advance(PinState::Debited);

        self.ports
            .usage
            .update_usage(username, size_bytes)
            .await
            .map_err(|err| match &err {
                UsageMeterError::CapExceeded { .. } => map_usage_error(&err),
                other => Error::usage_update_failed(format!("failed to record usage: {other}")),
            })?;
        run.record(Compensation::ReduceUsage {
            username: username.clone(),
            bytes: size_bytes,
        });
        run.advance(PinState::UsageCommitted);
        Ok(())
    }

    async fn publish(&self, run: &mut Run, publication: &Publication<'_>) -> Result<(), Error> {
        let message = self.message(publication);
        self.ports
            .publisher
            .publish(&message)
            .await
            .map_err(|err| Error::queue_publish_failed(format!("failed to queue pin: {err}")))?;
        run.advance(PinState::Published);
        Ok(())
    }
}
