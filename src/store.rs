//! sled-backed persistence for sanctions, registrations and audit logs
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::{Db, Transactional, Tree};

use crate::error::SanctionError;
use crate::node::{NodeLog, Registration};
use crate::sanction::Sanction;

const SANCTIONS: &str = "sanctions";
const REGISTRATIONS: &str = "registrations";
const OWNERS: &str = "owners";
const LOGS: &str = "logs";

pub type TxResult<T> = ConflictableTransactionResult<T, SanctionError>;

/// A stored record whose bytes no longer decode.
#[derive(Debug)]
pub struct UnreadableRecord {
    pub key: String,
    pub error: SanctionError,
}

pub struct Store {
    instance: Arc<Db>,
    sanctions: Tree,
    registrations: Tree,
    owners: Tree, // sanction id -> registration id
    logs: Tree,   // "<project id>/<digest>" -> NodeLog
}

impl Store {
    pub fn new(instance: Arc<Db>) -> Result<Self, sled::Error> {
        Ok(Self {
            sanctions: instance.open_tree(SANCTIONS)?,
            registrations: instance.open_tree(REGISTRATIONS)?,
            owners: instance.open_tree(OWNERS)?,
            logs: instance.open_tree(LOGS)?,
            instance,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("failed to open sled database at {}", path.display()))?;
        Ok(Self::new(Arc::new(db))?)
    }

    pub fn flush(&self) -> Result<(), SanctionError> {
        self.instance.flush()?;
        Ok(())
    }

    pub fn insert_registration(&self, registration: &Registration) -> Result<(), SanctionError> {
        let cbor = minicbor::to_vec(registration).map_err(SanctionError::encoding)?;
        self.registrations.insert(registration.id.as_bytes(), cbor)?;
        Ok(())
    }

    pub fn load_registration(&self, id: &str) -> Result<Option<Registration>, SanctionError> {
        self.registrations
            .get(id.as_bytes())?
            .map(|bytes| minicbor::decode(&bytes).map_err(SanctionError::encoding))
            .transpose()
    }

    pub fn load_sanction(&self, id: &str) -> Result<Option<Sanction>, SanctionError> {
        self.sanctions
            .get(id.as_bytes())?
            .map(|bytes| minicbor::decode(&bytes).map_err(SanctionError::encoding))
            .transpose()
    }

    /// The registration that references the given sanction.
    pub fn owner_of(&self, sanction_id: &str) -> Result<Option<Registration>, SanctionError> {
        match self.owners.get(sanction_id.as_bytes())? {
            Some(registration_id) => {
                let registration_id = String::from_utf8_lossy(&registration_id).into_owned();
                self.load_registration(&registration_id)
            }
            None => Ok(None),
        }
    }

    /// Every stored sanction. A record that fails to decode comes back as an
    /// `UnreadableRecord` in its place so one bad entry never hides the rest.
    pub fn scan_sanctions(&self) -> Result<Vec<Result<Sanction, UnreadableRecord>>, SanctionError> {
        let mut records = vec![];
        for entry in self.sanctions.iter() {
            let (key, bytes) = entry?;
            let record = minicbor::decode::<Sanction>(&bytes).map_err(|e| UnreadableRecord {
                key: String::from_utf8_lossy(&key).into_owned(),
                error: SanctionError::encoding(e),
            });
            records.push(record);
        }
        Ok(records)
    }

    /// Audit entries of a project, oldest first.
    pub fn logs_for(&self, project_id: &str) -> Result<Vec<NodeLog>, SanctionError> {
        let prefix = format!("{project_id}/");
        let mut logs = vec![];
        for entry in self.logs.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = entry?;
            logs.push(minicbor::decode::<NodeLog>(&bytes).map_err(SanctionError::encoding)?);
        }
        logs.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(logs)
    }

    /// Most recently registered public registrations, skipping deleted,
    /// retracted and pending-embargo ones.
    pub fn recent_public_registrations(&self, n: usize) -> Result<Vec<Registration>, SanctionError> {
        let mut listed = vec![];
        for entry in self.registrations.iter() {
            let (_, bytes) = entry?;
            let registration: Registration =
                minicbor::decode(&bytes).map_err(SanctionError::encoding)?;
            if registration.is_listable() {
                listed.push(registration);
            }
        }
        listed.sort_by(|a, b| b.registered_date.cmp(&a.registered_date));
        listed.truncate(n);
        Ok(listed)
    }

    /// Runs `f` atomically over every tree. sled may rerun `f` on conflict,
    /// so everything it reads must come from the `StoreTxn` handed to it.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, SanctionError>
    where
        F: Fn(&StoreTxn<'_>) -> TxResult<T>,
    {
        (&self.sanctions, &self.registrations, &self.owners, &self.logs)
            .transaction(|(sanctions, registrations, owners, logs)| {
                let txn = StoreTxn {
                    sanctions,
                    registrations,
                    owners,
                    logs,
                };
                f(&txn)
            })
            .map_err(|e| match e {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => SanctionError::Storage(err),
            })
    }
}

/// Typed view over the trees inside a transaction.
pub struct StoreTxn<'a> {
    sanctions: &'a TransactionalTree,
    registrations: &'a TransactionalTree,
    owners: &'a TransactionalTree,
    logs: &'a TransactionalTree,
}

/// Aborts the surrounding transaction with a domain error.
pub fn abort<T>(err: SanctionError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> TxResult<Vec<u8>> {
    minicbor::to_vec(value).or_else(|e| abort(SanctionError::encoding(e)))
}

fn decode<T>(bytes: &[u8]) -> TxResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).or_else(|e| abort(SanctionError::encoding(e)))
}

impl StoreTxn<'_> {
    pub fn get_sanction(&self, id: &str) -> TxResult<Option<Sanction>> {
        match self.sanctions.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_sanction(&self, sanction: &Sanction) -> TxResult<()> {
        self.sanctions
            .insert(sanction.id.as_bytes(), encode(sanction)?)?;
        Ok(())
    }

    pub fn get_registration(&self, id: &str) -> TxResult<Option<Registration>> {
        match self.registrations.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_registration(&self, registration: &Registration) -> TxResult<()> {
        self.registrations
            .insert(registration.id.as_bytes(), encode(registration)?)?;
        Ok(())
    }

    pub fn owner_of(&self, sanction_id: &str) -> TxResult<Option<Registration>> {
        match self.owners.get(sanction_id.as_bytes())? {
            Some(registration_id) => {
                let registration_id = String::from_utf8_lossy(&registration_id).into_owned();
                self.get_registration(&registration_id)
            }
            None => Ok(None),
        }
    }

    pub fn set_owner(&self, sanction_id: &str, registration_id: &str) -> TxResult<()> {
        self.owners
            .insert(sanction_id.as_bytes(), registration_id.as_bytes())?;
        Ok(())
    }

    pub fn append_log(&self, log: &NodeLog) -> TxResult<()> {
        let (hash, cbor) = log.build().or_else(|e| abort(SanctionError::encoding(e)))?;
        let key = format!("{}/{hash}", log.project_id);
        self.logs.insert(key.as_bytes(), cbor)?;
        Ok(())
    }
}
