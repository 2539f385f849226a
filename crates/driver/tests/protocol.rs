use anyhow::Result;
use frostbft_driver::{
    aggregate_signature, group_key_to_bytes, signature_to_bytes,
    verify_signature, DkgDriver, DkgOutput, ProtocolDriver, RoundMessage,
    SignDriver, SignPackage,
};

/// Deliver each message to the driver whose party number matches the
/// receiver.
fn deliver<D>(drivers: &mut [(u16, D)], messages: Vec<D::Message>) -> Result<()>
where
    D: ProtocolDriver,
    D::Message: Receiver,
{
    for message in messages {
        let receiver = message.receiver();
        let (_, driver) = drivers
            .iter_mut()
            .find(|(party, _)| *party == receiver)
            .expect("message addressed to unknown party");
        driver.handle_incoming(message)?;
    }
    Ok(())
}

trait Receiver {
    fn receiver(&self) -> u16;
}

impl<B> Receiver for RoundMessage<B> {
    fn receiver(&self) -> u16 {
        self.receiver
    }
}

fn run_dkg(max_signers: u16, min_signers: u16) -> Result<Vec<DkgOutput>> {
    let mut drivers = (1..=max_signers)
        .map(|party| {
            Ok((party, DkgDriver::new(party, max_signers, min_signers)?))
        })
        .collect::<Result<Vec<_>>>()?;

    for _ in 0..2 {
        let mut outbound = Vec::new();
        for (_, driver) in drivers.iter_mut() {
            outbound.extend(driver.proceed()?);
        }
        deliver(&mut drivers, outbound)?;
    }

    drivers
        .iter_mut()
        .map(|(party, driver)| {
            driver
                .try_finalize()?
                .ok_or_else(|| anyhow::anyhow!("party {party} not finalized"))
        })
        .collect()
}

fn make_sign_drivers(
    outputs: &[DkgOutput],
    signers: &[u16],
    min_signers: u16,
    message: &[u8],
) -> Result<Vec<(u16, SignDriver)>> {
    signers
        .iter()
        .map(|party| {
            let (key_package, public_package) =
                outputs[*party as usize - 1].clone();
            Ok((
                *party,
                SignDriver::new(
                    *party,
                    signers.to_vec(),
                    min_signers,
                    key_package,
                    public_package,
                    message.to_vec(),
                )?,
            ))
        })
        .collect()
}

fn run_sign_rounds(
    drivers: &mut Vec<(u16, SignDriver)>,
) -> Result<Vec<RoundMessage<SignPackage>>> {
    let mut outbound = Vec::new();
    for (_, driver) in drivers.iter_mut() {
        outbound.extend(driver.proceed()?);
    }
    deliver(drivers, outbound)?;

    let mut shares = Vec::new();
    for (_, driver) in drivers.iter_mut() {
        shares.extend(driver.proceed()?);
    }
    Ok(shares)
}

#[test]
fn dkg_produces_one_group_key() -> Result<()> {
    let outputs = run_dkg(3, 2)?;
    assert_eq!(outputs.len(), 3);
    let group_key = group_key_to_bytes(&outputs[0].1)?;
    for (_, public_package) in &outputs {
        assert_eq!(group_key, group_key_to_bytes(public_package)?);
    }
    Ok(())
}

#[test]
fn threshold_subset_signs_and_verifies() -> Result<()> {
    let outputs = run_dkg(3, 2)?;
    let message = [0u8; 32];

    let mut drivers = make_sign_drivers(&outputs, &[1, 2], 2, &message)?;
    let shares = run_sign_rounds(&mut drivers)?;
    deliver(&mut drivers, shares)?;

    let mut signatures = Vec::new();
    for (party, driver) in drivers.iter_mut() {
        assert!(driver.can_finalize());
        let signature = driver
            .try_finalize()?
            .ok_or_else(|| anyhow::anyhow!("party {party} not finalized"))?;
        signatures.push(signature_to_bytes(&signature)?);
    }
    assert_eq!(signatures[0], signatures[1]);

    let group_key = group_key_to_bytes(&outputs[0].1)?;
    verify_signature(&group_key, &message, &signatures[0])?;
    Ok(())
}

#[test]
fn distinct_subsets_produce_valid_signatures() -> Result<()> {
    let outputs = run_dkg(3, 2)?;
    let message = b"subset test".to_vec();
    let group_key = group_key_to_bytes(&outputs[0].1)?;

    for signers in [[1u16, 2], [1, 3], [2, 3]] {
        let mut drivers =
            make_sign_drivers(&outputs, &signers, 2, &message)?;
        let shares = run_sign_rounds(&mut drivers)?;
        deliver(&mut drivers, shares)?;
        let signature = drivers[0]
            .1
            .try_finalize()?
            .expect("first signer finalizes");
        verify_signature(
            &group_key,
            &message,
            &signature_to_bytes(&signature)?,
        )?;
    }
    Ok(())
}

#[test]
fn foreign_share_fails_aggregation() -> Result<()> {
    let outputs = run_dkg(3, 2)?;
    let message = [7u8; 32];

    let mut drivers = make_sign_drivers(&outputs, &[1, 2], 2, &message)?;
    let mut shares = run_sign_rounds(&mut drivers)?;

    // A share from an unrelated signing run decodes fine but cannot
    // verify against this run's commitments.
    let mut foreign = make_sign_drivers(&outputs, &[1, 2], 2, &[9u8; 32])?;
    let foreign_shares = run_sign_rounds(&mut foreign)?;
    for msg in shares.iter_mut() {
        if msg.sender == 2 {
            let replacement = foreign_shares
                .iter()
                .find(|m| m.sender == 2)
                .expect("foreign share from party 2");
            msg.body = replacement.body.clone();
        }
    }

    deliver(&mut drivers, shares)?;
    let (_, driver) = drivers
        .iter_mut()
        .find(|(party, _)| *party == 1)
        .expect("party 1");
    assert!(driver.try_finalize().is_err());
    Ok(())
}

#[test]
fn round_trip_through_wire_bytes() -> Result<()> {
    let outputs = run_dkg(2, 2)?;
    let message = b"wire".to_vec();
    let mut drivers = make_sign_drivers(&outputs, &[1, 2], 2, &message)?;

    // Encode and decode every message as the envelope layer would.
    let mut outbound = Vec::new();
    for (_, driver) in drivers.iter_mut() {
        outbound.extend(driver.proceed()?);
    }
    let decoded = outbound
        .iter()
        .map(|m| RoundMessage::<SignPackage>::from_bytes(&m.to_bytes()?))
        .collect::<frostbft_driver::Result<Vec<_>>>()?;
    deliver(&mut drivers, decoded)?;

    let shares = {
        let mut shares = Vec::new();
        for (_, driver) in drivers.iter_mut() {
            shares.extend(driver.proceed()?);
        }
        shares
    };
    deliver(&mut drivers, shares)?;

    for (_, driver) in drivers.iter_mut() {
        assert!(driver.try_finalize()?.is_some());
    }
    Ok(())
}

#[test]
fn non_signer_can_aggregate() -> Result<()> {
    use std::collections::BTreeMap;

    let outputs = run_dkg(3, 2)?;
    let message = [3u8; 32];
    let mut drivers = make_sign_drivers(&outputs, &[1, 2], 2, &message)?;

    // Capture broadcast commitments and shares off the wire, the way
    // a coordinator reads them from committed state.
    let mut commitments = BTreeMap::new();
    let mut shares = BTreeMap::new();

    let mut outbound = Vec::new();
    for (_, driver) in drivers.iter_mut() {
        outbound.extend(driver.proceed()?);
    }
    for msg in &outbound {
        if let SignPackage::Round1(c) = &msg.body {
            commitments.insert(
                frostbft_driver::frost_ed25519::Identifier::try_from(
                    msg.sender,
                )?,
                c.clone(),
            );
        }
    }
    deliver(&mut drivers, outbound)?;

    let mut outbound = Vec::new();
    for (_, driver) in drivers.iter_mut() {
        outbound.extend(driver.proceed()?);
    }
    for msg in &outbound {
        if let SignPackage::Round2(s) = &msg.body {
            shares.insert(
                frostbft_driver::frost_ed25519::Identifier::try_from(
                    msg.sender,
                )?,
                s.clone(),
            );
        }
    }

    // Party 3 holds only the public package yet aggregates the same
    // signature the signers produce.
    let public_package = &outputs[2].1;
    let signature =
        aggregate_signature(&commitments, &shares, &message, public_package)?;
    let group_key = group_key_to_bytes(public_package)?;
    verify_signature(&group_key, &message, &signature_to_bytes(&signature)?)?;
    Ok(())
}
