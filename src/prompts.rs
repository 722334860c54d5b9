//! Orchestrator prompt text.
//!
//! Stage instructions take the topic through `{topic}`; see
//! [`crate::pipeline::Stage::instruction`].

pub const ORCHESTRATOR_SYSTEM_PROMPT: &str = "You supervise one step of a fixed research \
    pipeline at a time. The program decides the order of the steps. Use tools only for the \
    step you are asked to perform and keep answers short.";

/// Framing for every validation round. The answer must start with
/// `APPROVE` to pass.
pub const VALIDATION_PROMPT: &str = "Review the outcome of the step that just ran. If it is \
    acceptable, answer with the single word APPROVE. If it should be redone, call the relevant \
    tool again with better arguments and then answer REDO. Give no explanation.";

pub const SEARCH_INSTRUCTION: &str = "Find documents about this research topic: {topic}. \
    Call both search_search_web and search_search_papers with a focused query.";

pub const FILTER_INSTRUCTION: &str = "Keep only relevant, high-quality sources. Decide on \
    exactly 5 criteria for judging quality and relevance to the topic, then call \
    filter_filter_results with query='{topic}', collection='raw' and criteria set to your 5 \
    criteria as strings. The tool scores every document in 'raw' from 1 to 5 on each criterion \
    and keeps the ones whose mean score is above 2.";

pub const PARSE_INSTRUCTION: &str = "Extract the full text of the filtered documents. Call \
    parser_parse_documents with document_to_process_collection='filtered' and \
    document_processed_collection='parsed'. The tool reads web pages and PDFs, stores the \
    results in 'parsed' and returns a shortened summary.";

pub const ANALYZE_INSTRUCTION: &str = "Analyze the parsed documents for themes, methods, \
    findings and open problems. Call analyzer_analyze_documents with \
    document_to_process_collection='parsed' and document_processed_collection='analyzed'. \
    The tool enriches each document, stores the results in 'analyzed' and returns a shortened \
    summary.";

pub const SYNTHESIZE_INSTRUCTION: &str = "Write the state-of-the-art report from the analyzed \
    documents. Call synthesizer_write_sota with collection='analyzed'.";

pub const STORE_INSTRUCTION: &str = "Save the final report. Call db_store_records with \
    collection='final_sota' and items set to a list holding one object: \
    {\"title\": \"State of the art: {topic}\", \"url\": \"\", \"source_type\": \"unknown\", \
    \"text\": <the full text returned by synthesizer_write_sota>}.";

pub const SAVE_SEARCH_INSTRUCTION: &str = "Save the search results now. Call \
    db_store_tool_results with collection='raw' and tool_call_ids set to the tool_call_id \
    values of the previous search_search_web and search_search_papers results. Each tool \
    result carries its 'tool_call_id' field.";

pub const SAVE_FILTER_INSTRUCTION: &str = "Save the filtered results now. Call \
    db_store_tool_results with collection='filtered' and tool_call_ids set to the \
    tool_call_id of the previous filter_filter_results result.";

pub const SAVE_SYNTHESIZE_INSTRUCTION: &str = "Save the report now. Call \
    db_store_tool_results with collection='synthesized' and tool_call_ids set to the \
    tool_call_id of the previous synthesizer_write_sota result.";

pub const VALIDATE_SEARCH: &str = "Check the search results and that the 'raw' collection \
    now holds the web and paper results.";

pub const VALIDATE_FILTER: &str = "Check the filtered sources and that the 'filtered' \
    collection holds only relevant, high-quality documents.";

pub const VALIDATE_PARSE: &str = "Check the parsed content and that the 'parsed' collection \
    holds documents with extracted full text.";

pub const VALIDATE_ANALYZE: &str = "Check the analysis and that the 'analyzed' collection \
    holds documents with themes and insights.";

pub const VALIDATE_SYNTHESIZE: &str = "Check the state-of-the-art report and that the \
    'synthesized' collection holds it.";

pub const VALIDATE_STORE: &str = "Check that the final report was saved to the 'final_sota' \
    collection.";
