//! Seeded randomness for draws and prizes
//!
//! Every value is a pure function of its seed string, so a finished game can be
//! replayed and audited from its id alone.

use crate::errors::RandomnessError;
use crate::games::types::RandomnessProof;
use rand::{rngs::StdRng, Rng, SeedableRng};
use schnorrkel::{
    signing_context, vrf::{VRFPreOut, VRFProof}, ExpansionMode, Keypair, MiniSecretKey, PublicKey,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Label used when expanding VRF output into RNG seed bytes
const VRF_OUTPUT_LABEL: &[u8] = b"survivor-draw:uniform";

/// Uniform integers derived from a caller-provided seed
pub trait RandomnessSource: Send + Sync {
    /// Value in `[min, max]`; identical seeds give identical values
    fn uniform(&self, min: u64, max: u64, seed: &str) -> Result<u64, RandomnessError>;

    /// Same value as `uniform`, plus the evidence needed to verify it
    fn uniform_with_proof(
        &self,
        min: u64,
        max: u64,
        seed: &str,
    ) -> Result<(u64, RandomnessProof), RandomnessError>;
}

fn check_range(min: u64, max: u64) -> Result<(), RandomnessError> {
    if min > max {
        return Err(RandomnessError::InvalidRange { min, max });
    }
    Ok(())
}

/// Map 32 seed bytes onto `[min, max]` without modulo bias
pub fn uniform_from_bytes(bytes: [u8; 32], min: u64, max: u64) -> u64 {
    StdRng::from_seed(bytes).gen_range(min..=max)
}

/// VRF-backed source: outputs are deterministic per key and seed, proofs are publicly checkable
pub struct VrfRandomness {
    keypair: Arc<Keypair>,
    context: Vec<u8>,
}

impl VrfRandomness {
    pub fn new(keypair: Keypair, context: &str) -> Self {
        Self {
            keypair: Arc::new(keypair),
            context: context.as_bytes().to_vec(),
        }
    }

    /// Keypair expanded from a 32-byte mini secret
    pub fn from_seed(seed: &[u8], context: &str) -> Result<Self, RandomnessError> {
        let mini = MiniSecretKey::from_bytes(seed)
            .map_err(|e| RandomnessError::Vrf(format!("Invalid VRF seed: {:?}", e)))?;
        Ok(Self::new(mini.expand_to_keypair(ExpansionMode::Ed25519), context))
    }

    /// Random keypair (proofs only verify within this process lifetime)
    pub fn new_random(context: &str) -> Self {
        use rand_core::OsRng;
        Self::new(Keypair::generate_with(OsRng), context)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }

    fn evaluate(&self, seed: &str) -> ([u8; 32], VRFPreOut, VRFProof) {
        let ctx = signing_context(&self.context);
        let (inout, proof, _batchable) = self.keypair.vrf_sign(ctx.bytes(seed.as_bytes()));
        let bytes: [u8; 32] = inout.make_bytes(VRF_OUTPUT_LABEL);
        (bytes, inout.to_preout(), proof)
    }

    /// Check a proof against the seed it claims and recompute the value it yields
    pub fn verify_proof(
        proof: &RandomnessProof,
        context: &str,
        expected_seed: &str,
        min: u64,
        max: u64,
    ) -> Result<u64, RandomnessError> {
        if proof.input_message != expected_seed {
            return Err(RandomnessError::InvalidProof(format!(
                "proof is for seed '{}', expected '{}'",
                proof.input_message, expected_seed
            )));
        }

        let public_key_bytes = hex::decode(&proof.public_key)
            .map_err(|e| RandomnessError::InvalidProof(format!("Invalid public key hex: {}", e)))?;
        let public_key = PublicKey::from_bytes(&public_key_bytes)
            .map_err(|e| RandomnessError::InvalidProof(format!("Invalid public key: {:?}", e)))?;

        let preout_bytes = hex::decode(&proof.output)
            .map_err(|e| RandomnessError::InvalidProof(format!("Invalid output hex: {}", e)))?;
        let preout = VRFPreOut::from_bytes(&preout_bytes)
            .map_err(|e| RandomnessError::InvalidProof(format!("Invalid output: {:?}", e)))?;

        let proof_bytes = hex::decode(&proof.proof)
            .map_err(|e| RandomnessError::InvalidProof(format!("Invalid proof hex: {}", e)))?;
        let vrf_proof = VRFProof::from_bytes(&proof_bytes)
            .map_err(|e| RandomnessError::InvalidProof(format!("Invalid proof: {:?}", e)))?;

        let ctx = signing_context(context.as_bytes());
        let (inout, _) = public_key
            .vrf_verify(ctx.bytes(expected_seed.as_bytes()), &preout, &vrf_proof)
            .map_err(|e| RandomnessError::InvalidProof(format!("VRF verification failed: {:?}", e)))?;

        check_range(min, max)?;
        let bytes: [u8; 32] = inout.make_bytes(VRF_OUTPUT_LABEL);
        Ok(uniform_from_bytes(bytes, min, max))
    }
}

impl RandomnessSource for VrfRandomness {
    fn uniform(&self, min: u64, max: u64, seed: &str) -> Result<u64, RandomnessError> {
        check_range(min, max)?;
        let (bytes, _, _) = self.evaluate(seed);
        Ok(uniform_from_bytes(bytes, min, max))
    }

    fn uniform_with_proof(
        &self,
        min: u64,
        max: u64,
        seed: &str,
    ) -> Result<(u64, RandomnessProof), RandomnessError> {
        check_range(min, max)?;
        let (bytes, preout, proof) = self.evaluate(seed);
        let value = uniform_from_bytes(bytes, min, max);

        Ok((
            value,
            RandomnessProof {
                input_message: seed.to_string(),
                output: hex::encode(preout.to_bytes()),
                proof: hex::encode(proof.to_bytes()),
                public_key: self.public_key_hex(),
            },
        ))
    }
}

/// SHA-256 keyed source without proofs, for tests and local runs
pub struct HashRandomness {
    secret: Vec<u8>,
}

impl HashRandomness {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn digest(&self, seed: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(b":");
        hasher.update(seed.as_bytes());
        hasher.finalize().into()
    }
}

impl RandomnessSource for HashRandomness {
    fn uniform(&self, min: u64, max: u64, seed: &str) -> Result<u64, RandomnessError> {
        check_range(min, max)?;
        Ok(uniform_from_bytes(self.digest(seed), min, max))
    }

    fn uniform_with_proof(
        &self,
        min: u64,
        max: u64,
        seed: &str,
    ) -> Result<(u64, RandomnessProof), RandomnessError> {
        check_range(min, max)?;
        let digest = self.digest(seed);
        Ok((
            uniform_from_bytes(digest, min, max),
            RandomnessProof {
                input_message: seed.to_string(),
                output: hex::encode(digest),
                proof: String::new(),
                public_key: String::new(),
            },
        ))
    }
}
