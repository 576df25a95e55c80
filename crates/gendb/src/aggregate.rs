//! Aggregation of ciphertexts across chunks and across slots.

use gendb_traits::HomomorphicBackend;
use gendb_util::prev_power_of_two;

use crate::{Result, SchemeContext};

/// Multiply the ciphertexts pairwise, level by level, so that the
/// multiplicative depth is `ceil(log2(n))`. The product of an empty list is
/// an encryption of 1.
pub fn multiply_tree<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    ciphertexts: Vec<B::Ciphertext>,
) -> Result<B::Ciphertext> {
    reduce_tree(ciphertexts, |lhs, rhs| context.multiply_assign(lhs, rhs))?
        .map_or_else(|| context.encrypt_value(1), Ok)
}

/// Add the ciphertexts pairwise, level by level. The sum of an empty list is
/// an encryption of 0.
pub fn add_tree<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    ciphertexts: Vec<B::Ciphertext>,
) -> Result<B::Ciphertext> {
    reduce_tree(ciphertexts, |lhs, rhs| context.add_assign(lhs, rhs))?
        .map_or_else(|| context.zero(), Ok)
}

fn reduce_tree<C>(
    mut level: Vec<C>,
    op: impl Fn(&mut C, &C) -> Result<()>,
) -> Result<Option<C>> {
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut iter = level.into_iter();
        while let Some(mut lhs) = iter.next() {
            // An unpaired element is carried to the next level.
            if let Some(rhs) = iter.next() {
                op(&mut lhs, &rhs)?;
            }
            next.push(lhs);
        }
        level = next;
    }
    Ok(level.pop())
}

/// Add the ciphertexts one after the other into a fresh encryption of zero.
pub fn add_many_safe<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    ciphertexts: &[B::Ciphertext],
) -> Result<B::Ciphertext> {
    let mut sum = context.zero()?;
    for ct in ciphertexts {
        context.add_assign(&mut sum, ct)?;
    }
    Ok(sum)
}

/// Sum every slot into slot 0 with a logarithmic number of rotations. The
/// other slots hold partial sums afterwards.
///
/// When the slot count `n` is not a power of two, the slots beyond the largest
/// power of two `m < n` are first masked out, rotated onto the first slots and
/// added, after which the first `m` slots are folded.
pub fn squash<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    ct: &mut B::Ciphertext,
) -> Result<()> {
    let n = context.num_slots();
    let m = prev_power_of_two(n);
    if m < n {
        let mut tail = ct.clone();
        context.multiply_plain_assign(&mut tail, &context.range_mask(m..n)?)?;
        context.rotate_left(&mut tail, m)?;
        context.add_assign(ct, &tail)?;
    }

    // Slot j < d only ever reads slots below 2d <= m.
    let mut d = m / 2;
    while d > 0 {
        let mut rotated = ct.clone();
        context.rotate_left(&mut rotated, d)?;
        context.add_assign(ct, &rotated)?;
        d /= 2;
    }
    Ok(())
}

/// Sum every slot into slot `lane`, zeroing the other slots.
pub fn squash_into_lane<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    mut ct: B::Ciphertext,
    lane: usize,
) -> Result<B::Ciphertext> {
    squash(context, &mut ct)?;
    context.rotate_right(&mut ct, lane)?;
    context.multiply_plain_assign(&mut ct, &context.one_hot(lane)?)?;
    Ok(ct)
}

/// Replicate slot 0 into every slot. The other slots must hold zeros.
pub fn expand<B: HomomorphicBackend>(
    context: &SchemeContext<B>,
    ct: &mut B::Ciphertext,
) -> Result<()> {
    let n = context.num_slots();
    let m = prev_power_of_two(n);

    let mut d = 1;
    while d < m {
        let mut rotated = ct.clone();
        context.rotate_right(&mut rotated, d)?;
        context.add_assign(ct, &rotated)?;
        d *= 2;
    }

    if m < n {
        let mut head = ct.clone();
        context.multiply_plain_assign(&mut head, &context.prefix_mask(n - m)?)?;
        context.rotate_right(&mut head, m)?;
        context.add_assign(ct, &head)?;
    }
    Ok(())
}
