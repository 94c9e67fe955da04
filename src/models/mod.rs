pub mod lookup;

pub use lookup::{
    AuditStatus, ExtractionStatus, FileType, LookupDataSource, LookupExecutionAudit,
    LookupIndexManager, LookupProfileManager, LookupProject, LookupPromptTemplate,
    PromptStudioLookupLink,
};
