//! The registrar: the node's directory of running channels.
//!
//! Exactly one channel on the node is the system channel. It is found at
//! start-up from the ledgers' last configs and is the only channel that may
//! create others.

use crate::chainsupport::ChainSupport;
use crate::error::{FatalError, RegistrarError, Result};
use crate::locator;
use crate::msgprocessor::{
    ChainCreator, Classification, Processor, StandardChannel, SystemChannel,
};
use crate::resources::check_resources;
use orderer_channelconfig::policy::{ADMINS, READERS, WRITERS};
use orderer_channelconfig::{
    ApplicationConfig, Bundle, Capabilities, Config, ConfigUpdateEnvelope, Policy,
};
use orderer_consensus::ConsenterRegistry;
use orderer_core::{Block, ChannelHeader, Envelope, Signer};
use orderer_storage::{Factory, ReadWriter};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tracing::{debug, info, warn};

#[derive(Default)]
struct State {
    chains: HashMap<String, Arc<ChainSupport>>,
    system_channel_id: Option<String>,
}

pub struct Registrar {
    self_ref: Weak<Registrar>,
    ledger_factory: Arc<dyn Factory>,
    signer: Arc<dyn Signer>,
    consenters: OnceLock<ConsenterRegistry>,
    state: Mutex<State>,
    // Serializes chain replacement. Never taken by a chain's own worker.
    replacing: Mutex<()>,
}

impl Registrar {
    /// Create an uninitialized registrar. Call [`Registrar::initialize`]
    /// before routing any message.
    pub fn new(ledger_factory: Arc<dyn Factory>, signer: Arc<dyn Signer>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            ledger_factory,
            signer,
            consenters: OnceLock::new(),
            state: Mutex::new(State::default()),
            replacing: Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a chain for every channel in the ledger factory.
    ///
    /// Fails unless exactly one of them is a system channel. Any error here
    /// leaves the node unusable.
    pub fn initialize(&self, consenters: ConsenterRegistry) -> std::result::Result<(), FatalError> {
        let mut installed = false;
        let consenters = self.consenters.get_or_init(|| {
            installed = true;
            consenters
        });
        if !installed {
            return Err(FatalError::AlreadyInitialized);
        }

        let mut channel_ids = self.ledger_factory.channel_ids();
        channel_ids.sort();

        let mut system: Option<(String, Arc<dyn ReadWriter>)> = None;
        let mut others = Vec::with_capacity(channel_ids.len());
        for channel_id in channel_ids {
            let ledger = self.ledger_factory.get_or_create(&channel_id)?;
            let config_tx = locator::config_tx(ledger.as_ref())?;
            let bundle =
                Bundle::from_config_tx(&config_tx).map_err(|source| FatalError::Config {
                    channel: channel_id.clone(),
                    source,
                })?;
            if !bundle.is_system_channel() {
                others.push((channel_id, ledger));
                continue;
            }
            if let Some((first, _)) = &system {
                return Err(FatalError::MultipleSystemChannels {
                    first: first.clone(),
                    second: channel_id,
                });
            }
            system = Some((channel_id, ledger));
        }
        let (system_id, system_ledger) = system.ok_or(FatalError::NoSystemChannel)?;

        let system_chain = self.build_chain(consenters, &system_id, system_ledger, true)?;
        system_chain.start()?;
        {
            let mut state = self.lock();
            state.system_channel_id = Some(system_id.clone());
            state.chains.insert(system_id.clone(), system_chain);
        }
        info!(channel = %system_id, "started system channel");

        for (channel_id, ledger) in others {
            let chain = self.build_chain(consenters, &channel_id, ledger, false)?;
            chain.start()?;
            self.lock().chains.insert(channel_id.clone(), chain);
            info!(channel = %channel_id, "started channel");
        }
        Ok(())
    }

    fn consenters(&self) -> std::result::Result<&ConsenterRegistry, RegistrarError> {
        self.consenters.get().ok_or(RegistrarError::NotInitialized)
    }

    fn processor_for(&self, is_system: bool) -> Box<dyn Processor> {
        if is_system {
            let creator: Weak<dyn ChainCreator> = self.self_ref.clone();
            Box::new(SystemChannel::new(Arc::clone(&self.signer), creator))
        } else {
            Box::new(StandardChannel::new(Arc::clone(&self.signer)))
        }
    }

    fn build_chain(
        &self,
        consenters: &ConsenterRegistry,
        channel_id: &str,
        ledger: Arc<dyn ReadWriter>,
        is_system: bool,
    ) -> std::result::Result<Arc<ChainSupport>, FatalError> {
        let chain = ChainSupport::new(
            channel_id,
            ledger,
            consenters,
            Arc::clone(&self.signer),
            self.processor_for(is_system),
            self.self_ref.clone(),
        )?;
        Ok(Arc::new(chain))
    }

    pub fn get_chain(&self, channel_id: &str) -> Option<Arc<ChainSupport>> {
        self.lock().chains.get(channel_id).cloned()
    }

    pub fn system_channel_id(&self) -> Option<String> {
        self.lock().system_channel_id.clone()
    }

    pub fn system_channel(&self) -> Option<Arc<ChainSupport>> {
        let state = self.lock();
        let id = state.system_channel_id.as_ref()?;
        state.chains.get(id).cloned()
    }

    pub fn channels_count(&self) -> usize {
        self.lock().chains.len()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().chains.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Rebuild the chain for `channel_id` from its ledger and install it,
    /// halting the chain it replaces.
    ///
    /// The replaced chain has stopped writing before the ledger is read, so
    /// the new chain resumes from the true head. Until it is installed,
    /// lookups return the halted chain.
    pub fn create_chain(&self, channel_id: &str) -> Result<()> {
        let consenters = self.consenters()?;
        let _replacing = self
            .replacing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = self.get_chain(channel_id) {
            debug!(channel = %channel_id, "halting replaced chain");
            old.halt();
        }
        self.install_chain(consenters, channel_id)
    }

    /// Build, start and publish the chain for `channel_id`. The state lock is
    /// only held for the insert.
    fn install_chain(&self, consenters: &ConsenterRegistry, channel_id: &str) -> Result<()> {
        let ledger = self.ledger_factory.get_or_create(channel_id)?;
        let is_system = self.system_channel_id().as_deref() == Some(channel_id);
        let chain = self.build_chain(consenters, channel_id, ledger, is_system)?;
        chain.start()?;
        self.lock().chains.insert(channel_id.to_string(), chain);

        info!(channel = %channel_id, "created chain");
        Ok(())
    }

    /// Find the chain a broadcast message should go to.
    ///
    /// Messages for unknown channels go to the system channel, whose
    /// processor turns config updates into channel-creation requests.
    pub fn broadcast_channel_support(
        &self,
        envelope: &Envelope,
    ) -> Result<(ChannelHeader, bool, Arc<ChainSupport>)> {
        let chdr = envelope.channel_header()?;
        if chdr.header_type.is_config_only() {
            return Err(RegistrarError::ConfigTypeRejected(chdr.header_type));
        }

        let chain = match self.get_chain(&chdr.channel_id) {
            Some(chain) => chain,
            None => self.system_channel().ok_or(RegistrarError::NoSystemChannel)?,
        };
        let is_config_update =
            chain.classify_msg(&chdr) == Classification::ConfigUpdateMsg;
        Ok((chdr, is_config_update, chain))
    }

    /// Build the template a channel-creation update is applied to.
    ///
    /// The template inherits the orderer section and channel capabilities of
    /// the system channel. Its `Admins` policy is the consortium's channel
    /// creation policy, so the update must satisfy it.
    pub fn new_channel_config(&self, envelope: &Envelope) -> Result<Bundle> {
        let system = self
            .system_channel()
            .ok_or(RegistrarError::NoSystemChannel)?
            .bundle();

        let payload = envelope.payload()?;
        let channel_id = payload.header.channel_header.channel_id.clone();
        if channel_id.is_empty() {
            return Err(RegistrarError::MissingChannelId);
        }
        let update_envelope: ConfigUpdateEnvelope = payload.decode_data()?;
        let update = update_envelope.update()?;
        if update.channel_id != channel_id {
            return Err(RegistrarError::ChannelIdMismatch {
                header: channel_id,
                update: update.channel_id,
            });
        }

        let application = update
            .application
            .as_ref()
            .ok_or(RegistrarError::MissingApplication)?;
        let consortium_name = update
            .consortium
            .as_ref()
            .ok_or(RegistrarError::MissingConsortium)?;
        let consortium = system
            .consortiums_config()
            .and_then(|consortiums| consortiums.get(consortium_name))
            .ok_or_else(|| RegistrarError::UnknownConsortium(consortium_name.clone()))?;

        let mut organizations = BTreeMap::new();
        for name in application.organizations.keys() {
            let org = consortium.organizations.get(name).ok_or_else(|| {
                RegistrarError::NotConsortiumMember {
                    org: name.clone(),
                    consortium: consortium_name.clone(),
                }
            })?;
            organizations.insert(name.clone(), org.clone());
        }

        let mut policies = BTreeMap::new();
        policies.insert(ADMINS.to_string(), consortium.channel_creation_policy.clone());
        policies.insert(WRITERS.to_string(), Policy::AcceptAll);
        policies.insert(READERS.to_string(), Policy::AcceptAll);

        let config = Config {
            sequence: 0,
            capabilities: system.channel_capabilities().clone(),
            orderer: system.orderer_config().cloned(),
            application: Some(ApplicationConfig {
                organizations,
                capabilities: Capabilities::default(),
            }),
            consortiums: None,
            consortium: Some(consortium_name.clone()),
            policies,
        };
        let bundle = Bundle::new(channel_id, config)?;
        check_resources(&bundle)?;
        Ok(bundle)
    }

    /// Create the channel described by a committed channel-creation config.
    ///
    /// Called by the system channel's block writer. A channel that already
    /// exists is left as it is.
    pub(crate) fn new_chain(&self, config_tx: Envelope) -> Result<()> {
        let channel_id = config_tx.channel_header()?.channel_id;
        if self.get_chain(&channel_id).is_some() {
            warn!(channel = %channel_id, "channel already exists, ignoring creation request");
            return Ok(());
        }

        let ledger = self.ledger_factory.get_or_create(&channel_id)?;
        if ledger.height() == 0 {
            ledger.append(Block::genesis(config_tx)?)?;
        }
        info!(channel = %channel_id, "created ledger for new channel");
        // Runs on the system channel's worker, which `create_chain` may be
        // waiting on, so the replacement lock is not taken here.
        self.install_chain(self.consenters()?, &channel_id)
    }

    /// Halt every running chain.
    pub fn halt_all(&self) {
        let chains: Vec<(String, Arc<ChainSupport>)> = self
            .lock()
            .chains
            .iter()
            .map(|(id, chain)| (id.clone(), Arc::clone(chain)))
            .collect();
        for (channel_id, chain) in chains {
            debug!(channel = %channel_id, "halting chain");
            chain.halt();
        }
    }
}

impl ChainCreator for Registrar {
    fn new_channel_config(&self, envelope: &Envelope) -> Result<Bundle> {
        Registrar::new_channel_config(self, envelope)
    }

    fn channels_count(&self) -> usize {
        Registrar::channels_count(self)
    }
}
