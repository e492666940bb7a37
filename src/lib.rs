/// Error taxonomy shared by every analysis stage: validation failures that
/// abort a run, singular-matrix conditions, convergence warnings and
/// cooperative cancellation.
pub mod error;

/// Numeric helpers: the F-distribution survival function used to convert
/// multivariate test statistics into significance values, and generic
/// polynomial evaluation.
pub mod calc;

/// Hierarchical dataset/object model: landmark configurations, categorical
/// and continuous variables, and the read-only snapshot consumed by the
/// analysis pipeline.
pub mod data;

/// Superimposition of landmark configurations: generalized Procrustes
/// analysis, Bookstein baseline registration, a resistant (median-based)
/// variant, and a centering-only passthrough.
pub mod align;

/// Multivariate analyses over aligned shapes: principal components,
/// canonical variates and MANOVA-style group-mean comparison.
pub mod ordination;

/// Polynomial regression of shape on a continuous covariate.
pub mod regress;

/// Orchestration of the full analysis: validation, stage sequencing,
/// progress reporting, cancellation and the immutable result model.
pub mod pipeline;

/// Tabular dumps of scores and coefficients for spreadsheet export.
pub mod table;
