//! Latent Dirichlet Allocation fitted by batch variational EM.
//!
//! Every EM iteration runs a coordinate-ascent E-step per document, rebuilds
//! the topic-word distributions from the accumulated sufficient statistics,
//! and re-estimates the asymmetric Dirichlet prior by constrained
//! Newton-Raphson. Tokenization and topic printing live with the caller; the
//! model consumes term-id counts and exposes its parameters read-only.

use anyhow::{bail, Result};
use indexmap::IndexMap;
use ndarray::{Array1, Array2, Axis};
use rand::distr::Open01;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

mod alpha;
mod math;

#[derive(Debug, Clone, Default)]
pub struct Document {
    pub words: IndexMap<usize, f64>,
}

impl Document {
    pub fn new() -> Self {
        Self {
            words: IndexMap::new(),
        }
    }

    pub fn total_count(&self) -> f64 {
        self.words.values().sum()
    }
}

impl<'a> FromIterator<&'a usize> for Document {
    fn from_iter<I: IntoIterator<Item = &'a usize>>(iter: I) -> Self {
        let mut doc = Self::new();

        for i in iter {
            *doc.words.entry(*i).or_insert(0_f64) += 1_f64;
        }

        doc
    }
}

/// Tokenized, count-compressed input collection. Immutable once handed to
/// the model.
#[derive(Debug, Clone)]
pub struct Corpus {
    docs: Vec<Document>,
    vocab_size: usize,
}

impl Corpus {
    pub fn new(docs: Vec<Document>, vocab_size: usize) -> Self {
        Self { docs, vocab_size }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn total_tokens(&self) -> f64 {
        self.docs.iter().map(Document::total_count).sum()
    }

    pub fn docs(&self) -> &[Document] {
        &self.docs
    }
}

/// Terminal state of the EM loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Converged,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub status: Status,
    // Monitoring bound after each EM iteration, in order
    pub elbo: Vec<f64>,
    pub iterations: usize,
}

pub struct BatchLDA {
    // Number of topics
    k: usize,
    // Vocabulary size
    v: usize,
    // Number of documents
    d: usize,
    corpus: Corpus,

    // Asymmetric Dirichlet prior over the topic simplex; strictly positive
    alpha: Array1<f64>,
    // Topic-word log-probabilities, V x K; every column of exp(beta) sums
    // to one after each M-step
    beta: Array2<f64>,
    // Per-document variational Dirichlet parameters, D x K
    gamma: Array2<f64>,
    // Count-weighted phi accumulator for the current EM iteration, V x K
    phi_table: Array2<f64>,

    gamma_threshold: f64,
    gamma_max_iter: usize,
    alpha_opts: alpha::NewtonOptions,
    em_threshold: f64,
    em_max_iter: usize,
}

pub struct BatchLDABuilder {
    k: usize,
    seed: u64,
    gamma_threshold: f64,
    gamma_max_iter: usize,
    alpha_threshold: f64,
    alpha_max_iter: usize,
    alpha_decay_factor: f64,
    alpha_max_decay: u32,
    em_threshold: f64,
    em_max_iter: usize,
}

impl BatchLDABuilder {
    pub fn new(num_topics: usize) -> Self {
        Self {
            k: num_topics,
            seed: 1,
            gamma_threshold: 1e-6,
            gamma_max_iter: 100,
            alpha_threshold: 1e-6,
            alpha_max_iter: 100,
            alpha_decay_factor: 0.9,
            alpha_max_decay: 10,
            em_threshold: 1e-5,
            em_max_iter: 100,
        }
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn gamma_threshold(&mut self, threshold: f64) -> &mut Self {
        self.gamma_threshold = threshold;
        self
    }

    pub fn gamma_max_iter(&mut self, max_iter: usize) -> &mut Self {
        self.gamma_max_iter = max_iter;
        self
    }

    pub fn alpha_threshold(&mut self, threshold: f64) -> &mut Self {
        self.alpha_threshold = threshold;
        self
    }

    pub fn alpha_max_iter(&mut self, max_iter: usize) -> &mut Self {
        self.alpha_max_iter = max_iter;
        self
    }

    pub fn alpha_decay_factor(&mut self, factor: f64) -> &mut Self {
        self.alpha_decay_factor = factor;
        self
    }

    pub fn alpha_max_decay(&mut self, max_decay: u32) -> &mut Self {
        self.alpha_max_decay = max_decay;
        self
    }

    pub fn em_threshold(&mut self, threshold: f64) -> &mut Self {
        self.em_threshold = threshold;
        self
    }

    pub fn em_max_iter(&mut self, max_iter: usize) -> &mut Self {
        self.em_max_iter = max_iter;
        self
    }

    /// Validates the corpus and produces an initialized model.
    ///
    /// Rejected before any inference runs: a zero topic count, an empty
    /// vocabulary, a corpus without documents or tokens, term ids outside
    /// the vocabulary, and non-positive or non-finite counts.
    pub fn build(&mut self, corpus: Corpus) -> Result<BatchLDA> {
        if self.k == 0 {
            bail!("number of topics must be positive");
        }
        if corpus.vocab_size == 0 {
            bail!("vocabulary is empty");
        }
        if corpus.is_empty() {
            bail!("corpus has no documents");
        }
        for (i, doc) in corpus.docs.iter().enumerate() {
            for (&term, &count) in &doc.words {
                if term >= corpus.vocab_size {
                    bail!(
                        "document {} references term {} outside the vocabulary of size {}",
                        i,
                        term,
                        corpus.vocab_size
                    );
                }
                if !(count > 0.0 && count.is_finite()) {
                    bail!("document {} has invalid count {} for term {}", i, count, term);
                }
            }
        }
        if corpus.total_tokens() == 0.0 {
            bail!("corpus has no tokens");
        }

        let k = self.k;
        let v = corpus.vocab_size;
        let d = corpus.len();
        let mut rng = StdRng::seed_from_u64(self.seed);

        // small positive prior on the 1/K scale
        let alpha = Array1::from_shape_fn(k, |_| rng.sample::<f64, _>(Open01) / k as f64);
        // near-uniform log weights; the first M-step replaces them with
        // normalized columns
        let beta = Array2::from_shape_fn((v, k), |_| (1.0 / v as f64 + rng.random::<f64>()).ln());

        let mut gamma = Array2::<f64>::zeros((d, k));
        for (i, doc) in corpus.docs.iter().enumerate() {
            let row = &alpha + doc.total_count() / k as f64;
            gamma.row_mut(i).assign(&row);
        }

        Ok(BatchLDA {
            k,
            v,
            d,
            corpus,
            alpha,
            beta,
            gamma,
            phi_table: Array2::zeros((v, k)),
            gamma_threshold: self.gamma_threshold,
            gamma_max_iter: self.gamma_max_iter,
            alpha_opts: alpha::NewtonOptions {
                decay_factor: self.alpha_decay_factor,
                max_decay: self.alpha_max_decay,
                threshold: self.alpha_threshold,
                max_iter: self.alpha_max_iter,
            },
            em_threshold: self.em_threshold,
            em_max_iter: self.em_max_iter,
        })
    }
}

impl BatchLDA {
    /// Runs EM until the relative change of the bound drops below the
    /// configured threshold or the iteration cap is reached.
    ///
    /// The tracked bound keeps the alpha, gamma and phi terms only; it is a
    /// monitoring statistic for the convergence test, not a full variational
    /// bound. Hitting the cap is not an error: the summary reports
    /// [`Status::Exhausted`] and the model holds the best estimate reached.
    pub fn train(&mut self, max_iter: Option<usize>) -> TrainSummary {
        let cap = max_iter.unwrap_or(self.em_max_iter);
        let mut elbo = Vec::with_capacity(cap);
        let mut previous = 0.0;

        for it in 0..cap {
            let current = self.em_iteration();
            log::info!("em iteration {}: elbo {}", it + 1, current);
            elbo.push(current);

            // the first iteration has no previous bound to compare against
            if it > 0 && ((current - previous) / previous).abs() < self.em_threshold {
                return TrainSummary {
                    status: Status::Converged,
                    elbo,
                    iterations: it + 1,
                };
            }
            previous = current;
        }

        TrainSummary {
            status: Status::Exhausted,
            elbo,
            iterations: cap,
        }
    }

    // One full EM sweep: E-step over every document into the zeroed
    // accumulators, M-step, bound assembly, then the prior update. The
    // alpha term of the bound uses the pre-update alpha.
    fn em_iteration(&mut self) -> f64 {
        self.phi_table.fill(0.0);

        let alpha_sum = self.alpha.sum();
        let likelihood_alpha =
            self.d as f64 * (math::gammaln(alpha_sum) - math::gammaln_1d(&self.alpha).sum());

        let mut likelihood_gamma = 0.0;
        let mut likelihood_phi = 0.0;
        let mut alpha_ss = Array1::<f64>::zeros(self.k);

        for doc in 0..self.d {
            likelihood_phi += self.e_step(doc);

            let row = self.gamma.row(doc).to_owned();
            let row_sum = row.sum();
            alpha_ss += &(math::psi_1d(&row) - math::psi(row_sum));
            likelihood_gamma += math::gammaln_1d(&row).sum() - math::gammaln(row_sum);
        }

        self.m_step();

        let likelihood = likelihood_alpha + likelihood_gamma + likelihood_phi;
        alpha::update_alpha(&mut self.alpha, &alpha_ss, self.d, &self.alpha_opts);

        likelihood
    }

    // Coordinate ascent for a single document: iterate phi and gamma to a
    // fixed point, then fold the converged, count-weighted phi into the
    // shared table. Returns the document's phi contribution to the bound.
    // A document without tokens converges on the first pass with its gamma
    // row equal to alpha.
    fn e_step(&mut self, doc: usize) -> f64 {
        let ids: Vec<usize> = self.corpus.docs[doc].words.keys().copied().collect();
        let cts: Vec<f64> = self.corpus.docs[doc].words.values().copied().collect();
        let terms = ids.len();
        let k = self.k;

        // cold start each EM iteration; converged values from the previous
        // iteration are deliberately discarded
        let mut gammad: Array1<f64> = &self.alpha + cts.iter().sum::<f64>() / k as f64;
        // log phi for the occurring terms, count-weighted once normalized
        let mut logphi = Array2::<f64>::zeros((terms, k));

        for it in 0..self.gamma_max_iter {
            let psi_gamma = math::psi_1d(&gammad);

            for (i, &term) in ids.iter().enumerate() {
                // psi(sum gamma) is constant in the topic index and cancels
                // against the normalizer below, so it is omitted rather
                // than computed
                for topic in 0..k {
                    logphi[[i, topic]] = self.beta[[term, topic]] + psi_gamma[topic];
                }
                let norm = math::log_sum_exp(logphi.row(i));
                let logct = cts[i].ln();
                for topic in 0..k {
                    logphi[[i, topic]] += logct - norm;
                }
            }

            let mut next = self.alpha.clone();
            for i in 0..terms {
                for topic in 0..k {
                    next[topic] += logphi[[i, topic]].exp();
                }
            }

            let mean_change = math::mean_abs_change(&gammad, &next);
            gammad = next;
            if mean_change <= self.gamma_threshold {
                log::trace!("document {}: gamma converged after {} iterations", doc, it + 1);
                break;
            }
        }

        self.gamma.row_mut(doc).assign(&gammad);

        let mut likelihood_phi = 0.0;
        for (i, &term) in ids.iter().enumerate() {
            for topic in 0..k {
                let lp = logphi[[i, topic]];
                self.phi_table[[term, topic]] += lp.exp();
                likelihood_phi += cts[i] * lp.exp() * (self.beta[[term, topic]] - lp);
            }
        }

        likelihood_phi
    }

    // Rebuild beta from the accumulated phi table by normalizing each topic
    // column. Pure in the table, hence idempotent between E-steps.
    fn m_step(&mut self) {
        let col_sums = self.phi_table.sum_axis(Axis(0));
        for topic in 0..self.k {
            let total = col_sums[topic];
            for term in 0..self.v {
                self.beta[[term, topic]] = (self.phi_table[[term, topic]] / total).ln();
            }
        }
    }

    pub fn num_topics(&self) -> usize {
        self.k
    }

    pub fn vocab_size(&self) -> usize {
        self.v
    }

    pub fn num_documents(&self) -> usize {
        self.d
    }

    /// Dirichlet prior over per-document topic proportions.
    pub fn alpha(&self) -> &Array1<f64> {
        &self.alpha
    }

    /// Topic-word log-probabilities with terms as rows, topics as columns.
    pub fn beta(&self) -> &Array2<f64> {
        &self.beta
    }

    /// Variational Dirichlet parameters, one row per document.
    pub fn gamma(&self) -> &Array2<f64> {
        &self.gamma
    }

    /// The `n` heaviest terms of one topic, as `(term id, probability)`
    /// pairs in descending order.
    pub fn top_terms(&self, topic: usize, n: usize) -> Vec<(usize, f64)> {
        let mut weighted: Vec<(usize, f64)> = self
            .beta
            .column(topic)
            .iter()
            .map(|lp| lp.exp())
            .enumerate()
            .collect();
        weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        weighted.truncate(n);
        weighted
    }
}
